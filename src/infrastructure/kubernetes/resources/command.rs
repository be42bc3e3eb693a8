// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shell wrappers implementing the cross-container rendezvous protocol.
//!
//! Containers sharing a pod coordinate through control files in the shared
//! scratch directory: `{name}.start` releases a container's payload,
//! `{name}.start_time` records epoch millis, `{name}.exit` carries the
//! payload's exit status and doubles as the run-once guard.

/// A payload command and the control-file name it reports under.
pub struct ContainerCommand<'a> {
    pub container: &'a str,
    pub cmd: String,
}

/// Wrap a single command with start and exit files.
///
/// - Don't repeat if already executed (`.exit` exists): sleep forever so a
///   pod restart cannot re-run the payload.
/// - Wait for the start signal before doing anything.
/// - Record the start time. In distributed mode each learner overwrites the
///   file; this is intentional.
/// - Write the command's exit code to the `.exit` file; conditionally when
///   the payload may already have written it.
/// - Stay alive afterwards so logs can be scraped and peers can finish.
pub fn wrap_command(
    cmd: &str,
    container_name: &str,
    control_files_dir: &str,
    do_cond_exit_write: bool,
) -> String {
    let exit_write = if do_cond_exit_write {
        format!(
            "if [ ! -f {dir}/{name}.exit ]; then\n\
             \techo $main_cmd_status > {dir}/{name}.exit\n\
             fi\n",
            dir = control_files_dir,
            name = container_name
        )
    } else {
        format!(
            "echo $? > {dir}/{name}.exit\n",
            dir = control_files_dir,
            name = container_name
        )
    };

    format!(
        "# Don't repeat if already executed.\n\
         if [ -f {dir}/{name}.exit ]; then\n\
         \twhile true; do sleep 1000; done\n\
         fi\n\
         # Wait for start signal.\n\
         while [ ! -f {dir}/{name}.start ]; do sleep 2; done\n\
         # Record the start time. Note: In distributed mode, this\n\
         # file will get overwritten by each learner (this is intentional)\n\
         date \"+%s%N\" | cut -b1-13 > {dir}/{name}.start_time\n\
         {cmd} # do the actual work\n\
         {exit_write}\
         while true; do sleep 2; done\n",
        dir = control_files_dir,
        name = container_name,
        cmd = cmd,
        exit_write = exit_write
    )
}

/// Wrap a sequence of commands, each with its own start and exit files, in
/// one container. Used in mounted-store mode where one container plays the
/// load-model, learner and store-logs roles in order.
pub fn wrap_commands(commands: &[ContainerCommand<'_>], control_files_dir: &str) -> String {
    let mut all = String::new();
    for command in commands {
        all.push_str(&format!(
            "if [ ! -f {dir}/{name}.exit ]; then\n\
             \twhile [ ! -f {dir}/{name}.start ]; do sleep 2; done ;\n\
             \tdate \"+%s%N\" | cut -b1-13 > {dir}/{name}.start_time ;\n\
             \t{cmd} ;\n\
             \techo $? > {dir}/{name}.exit ;\n\
             fi\n\
             echo \"Done {name}\" ;\n",
            dir = control_files_dir,
            name = command.container,
            cmd = command.cmd
        ));
    }
    all.push_str("while true; do sleep 2; done ;\n");
    all
}

/// Prefix pre-creating the `.exit` file of a skipped stage so downstream
/// waits are satisfied immediately.
pub fn skip_stage_prefix(container_name: &str, control_files_dir: &str) -> String {
    format!("echo 0 > {}/{}.exit && ", control_files_dir, container_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_guards_against_reexecution() {
        let wrapped = wrap_command("train.sh", "learner", "/job", false);
        // Guard must come before the payload.
        let guard = wrapped.find("if [ -f /job/learner.exit ]").unwrap();
        let sleep_forever = wrapped.find("while true; do sleep 1000; done").unwrap();
        let payload = wrapped.find("train.sh").unwrap();
        assert!(guard < sleep_forever);
        assert!(sleep_forever < payload);
    }

    #[test]
    fn wrapper_waits_for_start_and_records_time() {
        let wrapped = wrap_command("train.sh", "learner", "/job", false);
        assert!(wrapped.contains("while [ ! -f /job/learner.start ]; do sleep 2; done"));
        assert!(wrapped.contains("date \"+%s%N\" | cut -b1-13 > /job/learner.start_time"));
        assert!(wrapped.contains("echo $? > /job/learner.exit"));
        assert!(wrapped.ends_with("while true; do sleep 2; done\n"));
    }

    #[test]
    fn conditional_exit_write() {
        let wrapped = wrap_command("train.sh", "learner", "/job", true);
        assert!(wrapped.contains("if [ ! -f /job/learner.exit ]; then"));
        assert!(wrapped.contains("echo $main_cmd_status > /job/learner.exit"));
        assert!(!wrapped.contains("echo $? > /job/learner.exit"));
    }

    #[test]
    fn sequence_emits_per_stage_control_files() {
        let commands = [
            ContainerCommand {
                container: "load-model",
                cmd: "loadmodel.sh".to_string(),
            },
            ContainerCommand {
                container: "learner",
                cmd: "train.sh".to_string(),
            },
            ContainerCommand {
                container: "store-logs",
                cmd: "store.sh".to_string(),
            },
        ];
        let wrapped = wrap_commands(&commands, "/job");
        for name in ["load-model", "learner", "store-logs"] {
            assert!(wrapped.contains(&format!("if [ ! -f /job/{}.exit ]", name)));
            assert!(wrapped.contains(&format!("echo $? > /job/{}.exit", name)));
            assert!(wrapped.contains(&format!("echo \"Done {}\" ;", name)));
        }
        assert!(wrapped.ends_with("while true; do sleep 2; done ;\n"));
    }

    #[test]
    fn skip_prefix_precreates_exit_file() {
        assert_eq!(
            skip_stage_prefix("load-data", "/job"),
            "echo 0 > /job/load-data.exit && "
        );
    }
}

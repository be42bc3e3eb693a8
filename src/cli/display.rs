//! Table rendering for CLI output

use chrono::Duration;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Color, ContentArrangement, Table};

/// Learner pod information for status display
#[derive(Debug, Clone)]
pub struct LearnerPodInfo {
    pub name: String,
    pub phase: String,
    pub ready: usize,
    pub containers: usize,
    pub age: Duration,
}

/// Render the learner pods of a training as a formatted table
pub fn render_learner_pods(training_id: &str, pods: &[LearnerPodInfo]) -> String {
    if pods.is_empty() {
        return format!("No pods found for training {}", training_id);
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("POD").set_alignment(CellAlignment::Left),
            Cell::new("PHASE").set_alignment(CellAlignment::Center),
            Cell::new("READY").set_alignment(CellAlignment::Center),
            Cell::new("AGE").set_alignment(CellAlignment::Right),
        ]);

    for pod in pods {
        let phase_color = match pod.phase.as_str() {
            "Running" | "Succeeded" => Color::Green,
            "Pending" => Color::Yellow,
            _ => Color::Red,
        };
        table.add_row(vec![
            Cell::new(&pod.name),
            Cell::new(&pod.phase).fg(phase_color),
            Cell::new(format!("{}/{}", pod.ready, pod.containers)),
            Cell::new(format_age(pod.age)),
        ]);
    }

    format!("Training {}\n{}", training_id, table)
}

fn format_age(age: Duration) -> String {
    let secs = age.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d", secs / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_formatting() {
        assert_eq!(format_age(Duration::seconds(42)), "42s");
        assert_eq!(format_age(Duration::seconds(150)), "2m");
        assert_eq!(format_age(Duration::seconds(7260)), "2h1m");
        assert_eq!(format_age(Duration::days(3)), "3d");
    }

    #[test]
    fn empty_pod_list() {
        let rendered = render_learner_pods("t1", &[]);
        assert!(rendered.contains("No pods found"));
    }
}

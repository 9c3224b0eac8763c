//! Plain-text summary printed to stdout.

use crate::error::ReportError;
use crate::model::RunSummary;

use super::Reporter;

pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn name(&self) -> &str {
        "console"
    }

    fn report(&self, summary: &RunSummary) -> Result<(), ReportError> {
        println!("{}", render(summary));
        Ok(())
    }
}

fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=^72}\n", " Run Summary "));
    out.push_str(&format!("Run:        {}\n", summary.run_id));
    out.push_str(&format!("Dataset:    {}\n", summary.dataset_name));
    out.push_str(&format!("Agent:      {}\n", summary.agent_name));
    out.push_str(&format!("Instances:  {}\n", summary.total_instances));
    out.push_str(&format!(
        "Resolved:   {} ({:.1}%)\n",
        summary.resolved,
        summary.resolve_rate() * 100.0
    ));
    out.push_str(&format!(
        "Failed: {}  Errors: {}  Timeouts: {}  Skipped: {}\n",
        summary.failed, summary.errors, summary.timeouts, summary.skipped
    ));

    if !summary.results.is_empty() {
        out.push_str(&format!("{:-^72}\n", ""));
        out.push_str(&format!(
            "{:<40} {:>10} {:>9} {:>9}\n",
            "instance", "status", "agent(s)", "eval(s)"
        ));
        for r in &summary.results {
            let agent_secs = r
                .agent_output
                .as_ref()
                .map(|a| format!("{:.1}", a.duration.as_secs_f64()))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "{:<40} {:>10} {:>9} {:>9.1}\n",
                clip(&r.instance.instance_id, 40),
                r.eval_result.status.to_string(),
                agent_secs,
                r.eval_result.duration.as_secs_f64()
            ));
            if !r.eval_result.error_message.is_empty() {
                out.push_str(&format!("    {}\n", clip(&r.eval_result.error_message, 68)));
            }
        }
    }
    out.push_str(&format!("{:=^72}\n", ""));
    out
}

fn clip(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

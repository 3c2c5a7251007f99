//! Long-form HTML report
//!
//! Self-contained document: task, final synthesis, then one collapsible
//! section per step. All text is escaped; summaries keep their line breaks.

use crate::models::{StepResult, StepStatus, Task};
use chrono::Utc;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn paragraphs(text: &str) -> String {
    text.split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("<p>{}</p>", escape_html(p.trim()).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_html(task: &Task, final_output: &str, steps: &[StepResult]) -> String {
    let mut sections = String::new();
    for step in steps {
        let (badge, class) = match step.status {
            StepStatus::Completed => ("completed", "ok"),
            StepStatus::Failed => ("failed", "failed"),
        };
        sections.push_str(&format!(
            r#"<details class="step {class}">
<summary><strong>{worker}</strong> &middot; iteration {iteration} &middot; {tools} tool call(s) &middot; <span class="badge">{badge}</span></summary>
{body}
</details>
"#,
            class = class,
            worker = escape_html(&step.worker),
            iteration = step.iteration,
            tools = step.tool_call_count,
            badge = badge,
            body = paragraphs(&step.summary),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Research report</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 960px; margin: 2rem auto; padding: 0 1rem; line-height: 1.5; color: #1f2933; }}
h1 {{ font-size: 1.5rem; }}
.task {{ background: #f5f7fa; border-left: 4px solid #3e4c59; padding: .75rem 1rem; }}
.synthesis {{ border: 1px solid #cbd2d9; border-radius: 6px; padding: 1rem; }}
details.step {{ border: 1px solid #e4e7eb; border-radius: 6px; margin: .5rem 0; padding: .5rem 1rem; }}
details.failed .badge {{ color: #b42318; }}
details.ok .badge {{ color: #067647; }}
footer {{ color: #7b8794; font-size: .8rem; margin-top: 2rem; }}
</style>
</head>
<body>
<h1>Research report</h1>
<div class="task">{task}</div>
<h2>Synthesis</h2>
<div class="synthesis">
{synthesis}
</div>
<h2>Specialist steps ({count})</h2>
{sections}
<footer>Task {task_id} &middot; generated {generated}</footer>
</body>
</html>
"#,
        task = escape_html(&task.text),
        synthesis = paragraphs(final_output),
        count = steps.len(),
        sections = sections,
        task_id = task.task_id,
        generated = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{step, task};

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn test_report_escapes_content_and_lists_steps() {
        let steps = vec![
            step("quant_researcher", StepStatus::Completed, "P/E < 20\nline two", 1),
            step("portfolio_analyst", StepStatus::Failed, "<script>x</script>", 2),
        ];
        let html = render_html(&task("Compare AAPL & MSFT", 5), "Buy AAPL.\n\nHold MSFT.", &steps);

        assert!(html.contains("Compare AAPL &amp; MSFT"));
        assert!(html.contains("P/E &lt; 20<br>line two"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("<p>Hold MSFT.</p>"));
        assert!(html.contains("Specialist steps (2)"));
    }
}

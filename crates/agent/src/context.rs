//! Carrying what a specialist learned across handoffs and step limits.

use switchboard_core::domain::conversation::{AgentContext, Message, Role};
use switchboard_core::domain::specialist::SpecialistId;

pub const HANDOFF_CONTEXT_HEADER: &str = "--- Handoff Context ---";

const MAX_EXTRACTED: usize = 5;
const RECENT_WINDOW: usize = 5;

const FINDING_MARKERS: [&str; 6] = [
    "i found that",
    "i discovered",
    "the issue is",
    "the problem is",
    "based on the documentation",
    "according to",
];

const RECOMMENDATION_MARKERS: [&str; 5] =
    ["i recommend", "you should", "consider", "best practice", "suggestion:"];

fn bullet_body(line: &str) -> Option<&str> {
    let stripped = line.trim_start_matches(['-', '•', '*']);
    (stripped.len() != line.len()).then(|| stripped.trim())
}

/// Lines of an answer that state a finding, plus bullet points. At most five.
pub fn extract_findings(answer: &str) -> Vec<String> {
    answer
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let lowered = line.to_lowercase();
            if FINDING_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                Some(line.to_string())
            } else {
                bullet_body(line).filter(|body| !body.is_empty()).map(str::to_string)
            }
        })
        .take(MAX_EXTRACTED)
        .collect()
}

pub fn extract_recommendations(answer: &str) -> Vec<String> {
    answer
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lowered = line.to_lowercase();
            RECOMMENDATION_MARKERS.iter().any(|marker| lowered.contains(marker))
        })
        .map(str::to_string)
        .take(MAX_EXTRACTED)
        .collect()
}

fn push_section(parts: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    parts.push(format!("\n{title}:"));
    parts.extend(items.iter().map(|item| format!("- {item}")));
}

/// The note the receiving specialist sees when it takes over.
pub fn handoff_summary(from: SpecialistId, reason: &str, context: Option<&AgentContext>) -> String {
    let reason = if reason.trim().is_empty() { "No reason provided" } else { reason.trim() };
    let mut parts =
        vec![format!("Handoff from {} agent.", from.as_str()), format!("Reason: {reason}")];
    if let Some(context) = context {
        push_section(&mut parts, "Findings", &context.findings);
        push_section(&mut parts, "Recommendations", &context.recommendations);
        push_section(&mut parts, "Constraints", &context.constraints);
        push_section(&mut parts, "Open Questions", &context.open_questions);
    }
    parts.join("\n")
}

pub fn handoff_message(summary: &str, context_summary: &str) -> String {
    let mut body = format!("{HANDOFF_CONTEXT_HEADER}\n{summary}");
    if !context_summary.trim().is_empty() {
        body.push_str("\n\nContext from previous specialist:\n");
        body.push_str(context_summary.trim());
    }
    body
}

fn progress_sections(parts: &mut Vec<String>, context: Option<&AgentContext>) {
    let Some(context) = context else {
        return;
    };
    push_section(parts, "Findings", &context.findings);
    push_section(parts, "Recommendations", &context.recommendations);
    push_section(parts, "Remaining questions", &context.open_questions);
}

pub fn step_limit_summary(
    specialist: SpecialistId,
    max_steps: u32,
    context: Option<&AgentContext>,
) -> String {
    let mut parts = vec![
        format!(
            "The {} agent has reached its step limit ({max_steps} steps).",
            specialist.as_str()
        ),
        "Here's what was discovered:".to_string(),
    ];
    progress_sections(&mut parts, context);
    parts.join("\n")
}

pub fn impasse_summary(specialist: SpecialistId, context: Option<&AgentContext>) -> String {
    let mut parts = vec![
        "I've detected a circular handoff pattern. Let me provide you with what we've \
         discovered so far rather than continuing to pass between agents."
            .to_string(),
        format!("Current specialist: {}.", specialist.display_name()),
    ];
    progress_sections(&mut parts, context);
    parts.join("\n")
}

pub fn handoff_refused_summary(
    specialist: SpecialistId,
    refusal: &str,
    context: Option<&AgentContext>,
) -> String {
    let mut parts = vec![
        format!("I wasn't able to bring in another specialist ({refusal})."),
        format!("Here is where the {} work stands:", specialist.display_name()),
    ];
    progress_sections(&mut parts, context);
    parts.join("\n")
}

fn is_chatter(message: &Message, keep_tool_results: bool) -> bool {
    match message.role {
        Role::Tool => !keep_tool_results,
        Role::Assistant => message.content.trim().is_empty(),
        Role::User | Role::System => false,
    }
}

/// Trimmed view of a conversation for prompt building: the original user
/// request plus the last five messages, without bare tool traffic.
pub fn context_view(messages: &[Message], keep_tool_results: bool) -> Vec<&Message> {
    let first_user = messages.iter().position(|message| message.role == Role::User);
    let recent_start = messages.len().saturating_sub(RECENT_WINDOW);

    let mut view = Vec::new();
    if let Some(index) = first_user {
        view.push(&messages[index]);
    }
    for (index, message) in messages.iter().enumerate().skip(recent_start) {
        if Some(index) == first_user || is_chatter(message, keep_tool_results) {
            continue;
        }
        view.push(message);
    }
    view
}

#[cfg(test)]
mod tests {
    use switchboard_core::domain::conversation::{AgentContext, Message, Role};
    use switchboard_core::domain::specialist::SpecialistId;

    use super::{
        context_view, extract_findings, extract_recommendations, handoff_message,
        handoff_summary, step_limit_summary, HANDOFF_CONTEXT_HEADER,
    };

    const ANSWER: &str = "I found that assignment rules already cover category routing.\n\
        The issue is that the on-call schedule is not linked.\n\
        - Group memberships are stale\n\
        I recommend linking the schedule to the assignment group.\n\
        Consider enabling the auto-assignment plugin.";

    #[test]
    fn extracts_findings_and_recommendations() {
        let findings = extract_findings(ANSWER);
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[2], "Group memberships are stale");

        let recommendations = extract_recommendations(ANSWER);
        assert_eq!(
            recommendations,
            vec![
                "I recommend linking the schedule to the assignment group.".to_string(),
                "Consider enabling the auto-assignment plugin.".to_string(),
            ]
        );
    }

    #[test]
    fn extraction_is_capped_at_five() {
        let answer = (0..9).map(|index| format!("- point {index}")).collect::<Vec<_>>().join("\n");
        assert_eq!(extract_findings(&answer).len(), 5);
    }

    #[test]
    fn handoff_summary_lists_nonempty_sections() {
        let mut context = AgentContext::new(SpecialistId::Consultant);
        context.findings.push("OOB rules cannot express the matrix".to_string());
        context.open_questions.push("Which groups are in scope?".to_string());

        let summary = handoff_summary(SpecialistId::Consultant, "custom code needed", Some(&context));

        assert!(summary.starts_with("Handoff from consultant agent.\nReason: custom code needed"));
        assert!(summary.contains("\nFindings:\n- OOB rules cannot express the matrix"));
        assert!(summary.contains("\nOpen Questions:\n- Which groups are in scope?"));
        assert!(!summary.contains("Recommendations:"));

        let message = handoff_message(&summary, "matrix lives in a spreadsheet");
        assert!(message.starts_with(HANDOFF_CONTEXT_HEADER));
        assert!(message.ends_with("matrix lives in a spreadsheet"));
    }

    #[test]
    fn step_limit_summary_names_the_budget() {
        let summary = step_limit_summary(SpecialistId::Implementation, 10, None);
        assert!(summary.starts_with("The implementation agent has reached its step limit (10 steps)."));
    }

    #[test]
    fn context_view_keeps_first_request_and_recent_non_tool_messages() {
        let mut messages = vec![Message::user("original request")];
        for index in 0..6 {
            messages.push(Message::assistant(SpecialistId::Consultant, format!("answer {index}")));
        }
        messages.push(Message::tool_result(SpecialistId::Consultant, "consult_public_docs", "doc", false));
        messages.push(Message::assistant(SpecialistId::Consultant, ""));

        let view = context_view(&messages, false);

        assert_eq!(view[0].content, "original request");
        assert!(view.iter().all(|message| message.role != Role::Tool));
        assert_eq!(view.len(), 4);
        assert_eq!(view[3].content, "answer 5");
        assert_eq!(context_view(&messages, true).len(), 5);
    }
}

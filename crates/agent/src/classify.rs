use airloop_core::domain::event::{Event, EventKind, PublicMessage};

use crate::llm::OutputItem;

/// Agent output sorted into what the caller sees and what the round record keeps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    pub events: Vec<Event>,
    pub messages: Vec<PublicMessage>,
    /// Targets of every handoff, in emission order.
    pub handoff_targets: Vec<String>,
}

impl Classification {
    /// Target of the last handoff, the only one that is applied.
    pub fn next_agent(&self) -> Option<&str> {
        self.handoff_targets.last().map(String::as_str)
    }

    pub fn has_multiple_handoffs(&self) -> bool {
        self.handoff_targets.len() > 1
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str)> {
        self.events.iter().filter_map(|event| match &event.kind {
            EventKind::ToolCall { name, .. } => Some((event.agent.as_str(), name.as_str())),
            _ => None,
        })
    }
}

pub fn classify(items: &[OutputItem]) -> Classification {
    let mut classification = Classification::default();

    for item in items {
        match item {
            OutputItem::Message { agent, content } => {
                classification
                    .events
                    .push(Event::new(agent, EventKind::Message { content: content.clone() }));
                classification
                    .messages
                    .push(PublicMessage { content: content.clone(), agent: agent.clone() });
            }
            OutputItem::ToolCall { agent, name, arguments, .. } => {
                classification.events.push(Event::new(
                    agent,
                    EventKind::ToolCall { name: name.clone(), arguments: arguments.clone() },
                ));
            }
            OutputItem::ToolOutput { agent, output, .. } => {
                classification
                    .events
                    .push(Event::new(agent, EventKind::ToolOutput { output: output.clone() }));
            }
            OutputItem::Handoff { source, target } => {
                classification.events.push(Event::new(
                    source,
                    EventKind::Handoff { source: source.clone(), target: target.clone() },
                ));
                classification.handoff_targets.push(target.clone());
            }
        }
    }

    classification
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::classify;
    use crate::llm::OutputItem;

    fn message(agent: &str, content: &str) -> OutputItem {
        OutputItem::Message { agent: agent.to_string(), content: content.to_string() }
    }

    fn handoff(source: &str, target: &str) -> OutputItem {
        OutputItem::Handoff { source: source.to_string(), target: target.to_string() }
    }

    #[test]
    fn events_keep_emission_order_and_messages_are_public() {
        let items = vec![
            message("Triage Agent", "Let me check."),
            OutputItem::ToolCall {
                agent: "Triage Agent".to_string(),
                call_id: "c1".to_string(),
                name: "faq_lookup_tool".to_string(),
                arguments: json!({"question": "wifi"}),
            },
            OutputItem::ToolOutput {
                agent: "Triage Agent".to_string(),
                call_id: "c1".to_string(),
                output: "free wifi".to_string(),
            },
            handoff("Triage Agent", "FAQ Agent"),
        ];

        let classified = classify(&items);

        let types: Vec<&str> = classified.events.iter().map(|event| event.type_name()).collect();
        assert_eq!(types, vec!["message", "tool_call", "tool_output", "handoff"]);
        assert_eq!(classified.messages.len(), 1);
        assert_eq!(classified.messages[0].agent, "Triage Agent");
        assert_eq!(classified.next_agent(), Some("FAQ Agent"));
        assert_eq!(classified.tool_calls().collect::<Vec<_>>(), vec![("Triage Agent", "faq_lookup_tool")]);
    }

    #[test]
    fn last_handoff_wins_and_is_reported_as_multiple() {
        let classified = classify(&[
            handoff("Triage Agent", "FAQ Agent"),
            handoff("Triage Agent", "Food Agent"),
        ]);

        assert!(classified.has_multiple_handoffs());
        assert_eq!(classified.next_agent(), Some("Food Agent"));
    }

    #[test]
    fn no_handoff_leaves_next_agent_unset() {
        let classified = classify(&[message("FAQ Agent", "Anything else?")]);
        assert_eq!(classified.next_agent(), None);
        assert!(!classified.has_multiple_handoffs());
    }
}

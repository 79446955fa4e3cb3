//! Event definitions.
//!
//! An event is one node of the interactive flow graph: a message, a prompt
//! with choices, a menu, a batch of actions, or an i-time sequence. Nodes
//! chain through `next`/`queueNext` IDs and conditional branches evaluated
//! at runtime; branch conditions may also defer to a script.

use serde::Deserialize;

use crate::error::Error;

use super::action::Action;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventCondition {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@value1")]
    pub value1: i32,
    #[serde(rename = "@value2")]
    pub value2: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventBranch {
    #[serde(rename = "@next")]
    pub next: String,
    #[serde(rename = "@queueNext")]
    pub queue_next: String,
    #[serde(rename = "condition")]
    pub conditions: Vec<EventCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventChoice {
    #[serde(rename = "@messageID")]
    pub message_id: i32,
    #[serde(rename = "@next")]
    pub next: String,
    #[serde(rename = "@queueNext")]
    pub queue_next: String,
    #[serde(rename = "@branchScriptID")]
    pub branch_script_id: String,
    /// Skip reachability checks for this choice's sequence.
    #[serde(rename = "@skipInvalid")]
    pub skip_invalid: bool,
    #[serde(rename = "branch")]
    pub branches: Vec<EventBranch>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Fork,
    NpcMessage { message_ids: Vec<i32> },
    Prompt { message_id: i32, choices: Vec<EventChoice> },
    OpenMenu { menu_type: i32, use_next: String },
    PerformActions { actions: Vec<Action> },
    Direction { direction: i32 },
    ITime {
        start_actions: String,
        gift_ids: Vec<u32>,
        choices: Vec<EventChoice>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "EventXml")]
pub struct Event {
    pub id: String,
    pub next: String,
    pub queue_next: String,
    pub branch_script_id: String,
    pub skip_invalid: bool,
    pub branches: Vec<EventBranch>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct EventXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    event_type: String,
    #[serde(rename = "@next")]
    next: String,
    #[serde(rename = "@queueNext")]
    queue_next: String,
    #[serde(rename = "@branchScriptID")]
    branch_script_id: String,
    #[serde(rename = "@skipInvalid")]
    skip_invalid: bool,
    #[serde(rename = "@messageID")]
    message_id: i32,
    #[serde(rename = "@menuType")]
    menu_type: i32,
    #[serde(rename = "@useNext")]
    use_next: String,
    #[serde(rename = "@direction")]
    direction: i32,
    #[serde(rename = "@startActions")]
    start_actions: String,
    #[serde(rename = "@giftIDs")]
    gift_ids: String,
    #[serde(rename = "message")]
    message_ids: Vec<i32>,
    #[serde(rename = "branch")]
    branches: Vec<EventBranch>,
    #[serde(rename = "choice")]
    choices: Vec<EventChoice>,
    #[serde(rename = "action")]
    actions: Vec<Action>,
}

impl TryFrom<EventXml> for Event {
    type Error = Error;

    fn try_from(xml: EventXml) -> Result<Self, Error> {
        if xml.id.is_empty() {
            return Err(Error::Validation("event with no id".into()));
        }

        let kind = match xml.event_type.as_str() {
            "fork" => EventKind::Fork,
            "npcMessage" => EventKind::NpcMessage {
                message_ids: xml.message_ids,
            },
            "prompt" => EventKind::Prompt {
                message_id: xml.message_id,
                choices: xml.choices,
            },
            "openMenu" => EventKind::OpenMenu {
                menu_type: xml.menu_type,
                use_next: xml.use_next,
            },
            "performActions" => EventKind::PerformActions {
                actions: xml.actions,
            },
            "direction" => EventKind::Direction {
                direction: xml.direction,
            },
            "iTime" => EventKind::ITime {
                start_actions: xml.start_actions,
                gift_ids: super::action::parse_id_list(&xml.gift_ids)?,
                choices: xml.choices,
            },
            other => {
                return Err(Error::Validation(format!(
                    "unknown event type on {}: {other}",
                    xml.id
                )))
            }
        };

        Ok(Event {
            id: xml.id,
            next: xml.next,
            queue_next: xml.queue_next,
            branch_script_id: xml.branch_script_id,
            skip_invalid: xml.skip_invalid,
            branches: xml.branches,
            kind,
        })
    }
}

/// Root element of an `/events/*.xml` file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventFile {
    #[serde(rename = "event")]
    pub events: Vec<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_event() {
        let event: Event = quick_xml::de::from_str(
            r#"<event id="npc_greet" type="prompt" messageID="100">
                 <choice messageID="101" next="npc_shop"/>
                 <choice messageID="102" next="npc_bye"/>
               </event>"#,
        )
        .unwrap();

        assert_eq!(event.id, "npc_greet");
        match &event.kind {
            EventKind::Prompt { message_id, choices } => {
                assert_eq!(*message_id, 100);
                assert_eq!(choices.len(), 2);
                assert_eq!(choices[0].next, "npc_shop");
            }
            other => panic!("expected prompt, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_perform_actions_event() {
        let event: Event = quick_xml::de::from_str(
            r#"<event id="boss_intro" type="performActions">
                 <action type="playBGM"/>
                 <action type="startEvent" eventID="boss_phase_2"/>
               </event>"#,
        )
        .unwrap();

        match &event.kind {
            EventKind::PerformActions { actions } => assert_eq!(actions.len(), 2),
            other => panic!("expected performActions, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_itime_event() {
        let event: Event = quick_xml::de::from_str(
            r#"<event id="it_1" type="iTime" startActions="it_1_start" giftIDs="5,6"/>"#,
        )
        .unwrap();

        match &event.kind {
            EventKind::ITime {
                start_actions,
                gift_ids,
                ..
            } => {
                assert_eq!(start_actions, "it_1_start");
                assert_eq!(gift_ids, &vec![5, 6]);
            }
            other => panic!("expected iTime, got {other:?}"),
        }
    }

    #[test]
    fn test_event_requires_id_and_known_type() {
        assert!(quick_xml::de::from_str::<Event>(r#"<event type="fork"/>"#).is_err());
        assert!(quick_xml::de::from_str::<Event>(r#"<event id="x" type="warp"/>"#).is_err());
    }

    #[test]
    fn test_event_file_holds_many() {
        let file: EventFile = quick_xml::de::from_str(
            r#"<events>
                 <event id="a" type="fork" next="b"/>
                 <event id="b" type="direction" direction="2"/>
               </events>"#,
        )
        .unwrap();
        assert_eq!(file.events.len(), 2);
    }
}

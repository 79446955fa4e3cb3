//! Actions attached to NPCs, objects, spots, triggers, spawn groups and
//! events.
//!
//! Actions deserialize from the XML `<action type="..."/>` form through an
//! intermediate struct; unknown types fail the load. A subset of action
//! types can only run with a player source and is rejected at load time in
//! contexts that execute automatically.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Who an action executes as when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceContext {
    /// The entity that fired the action (a player in interactive contexts).
    #[default]
    Source,
    /// The entity the action is attached to.
    Origin,
    /// Every enemy associated with the context.
    Enemies,
    /// Everyone in the zone.
    All,
}

impl SourceContext {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "source" => Ok(SourceContext::Source),
            "origin" => Ok(SourceContext::Origin),
            "enemies" => Ok(SourceContext::Enemies),
            "all" => Ok(SourceContext::All),
            other => Err(Error::Validation(format!(
                "unknown action source context: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneInstanceMode {
    Create,
    Join,
    ClanJoin,
    TeamJoin,
    TeamPvp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    AddRemoveItems,
    AddRemoveStatus,
    CreateLoot,
    Delay {
        duration: u32,
        actions: Vec<Action>,
    },
    DisplayMessage,
    GrantSkills,
    GrantXp,
    PlayBgm,
    PlaySoundEffect,
    RunScript {
        script_id: String,
    },
    SetHomepoint,
    SetNpcState,
    SpecialDirection,
    Spawn {
        spawn_group_ids: Vec<u32>,
        defeat_actions: Vec<Action>,
    },
    StageEffect,
    StartEvent {
        event_id: String,
    },
    UpdateComp,
    UpdateFlag,
    UpdateLnc,
    UpdatePoints,
    UpdateQuest,
    UpdateZoneFlags,
    ZoneChange {
        zone_id: u32,
        dynamic_map_id: u32,
    },
    ZoneInstance {
        mode: ZoneInstanceMode,
        timer_expiration_event_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ActionXml")]
pub struct Action {
    pub source_context: SourceContext,
    pub stop_on_failure: bool,
    pub on_failure_event: String,
    pub kind: ActionKind,
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ActionKind::AddRemoveItems => "addRemoveItems",
            ActionKind::AddRemoveStatus => "addRemoveStatus",
            ActionKind::CreateLoot => "createLoot",
            ActionKind::Delay { .. } => "delay",
            ActionKind::DisplayMessage => "displayMessage",
            ActionKind::GrantSkills => "grantSkills",
            ActionKind::GrantXp => "grantXP",
            ActionKind::PlayBgm => "playBGM",
            ActionKind::PlaySoundEffect => "playSoundEffect",
            ActionKind::RunScript { .. } => "runScript",
            ActionKind::SetHomepoint => "setHomepoint",
            ActionKind::SetNpcState => "setNPCState",
            ActionKind::SpecialDirection => "specialDirection",
            ActionKind::Spawn { .. } => "spawn",
            ActionKind::StageEffect => "stageEffect",
            ActionKind::StartEvent { .. } => "startEvent",
            ActionKind::UpdateComp => "updateCOMP",
            ActionKind::UpdateFlag => "updateFlag",
            ActionKind::UpdateLnc => "updateLNC",
            ActionKind::UpdatePoints => "updatePoints",
            ActionKind::UpdateQuest => "updateQuest",
            ActionKind::UpdateZoneFlags => "updateZoneFlags",
            ActionKind::ZoneChange { .. } => "zoneChange",
            ActionKind::ZoneInstance { .. } => "zoneInstance",
        }
    }

    /// Action types that only make sense with a player source. These are
    /// rejected at load time in automatic contexts.
    pub fn is_player_required(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AddRemoveItems
                | ActionKind::DisplayMessage
                | ActionKind::GrantSkills
                | ActionKind::GrantXp
                | ActionKind::PlayBgm
                | ActionKind::PlaySoundEffect
                | ActionKind::SetHomepoint
                | ActionKind::SpecialDirection
                | ActionKind::StageEffect
                | ActionKind::UpdateComp
                | ActionKind::UpdateFlag
                | ActionKind::UpdateLnc
                | ActionKind::UpdateQuest
                | ActionKind::ZoneChange { .. }
                | ActionKind::ZoneInstance { .. }
        )
    }

    /// Child action lists nested under this action.
    pub fn nested_actions(&self) -> &[Action] {
        match &self.kind {
            ActionKind::Delay { actions, .. } => actions,
            ActionKind::Spawn { defeat_actions, .. } => defeat_actions,
            _ => &[],
        }
    }
}

/// Flatten an action list including everything nested under delay and spawn
/// children.
pub fn all_actions(actions: &[Action]) -> Vec<&Action> {
    let mut out = Vec::new();
    let mut stack: Vec<&Action> = actions.iter().collect();
    while let Some(action) = stack.pop() {
        out.push(action);
        stack.extend(action.nested_actions());
    }
    out
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ActionXml {
    #[serde(rename = "@type")]
    action_type: String,
    #[serde(rename = "@sourceContext")]
    source_context: String,
    #[serde(rename = "@stopOnFailure")]
    stop_on_failure: bool,
    #[serde(rename = "@onFailureEvent")]
    on_failure_event: String,
    #[serde(rename = "@eventID")]
    event_id: String,
    #[serde(rename = "@scriptID")]
    script_id: String,
    #[serde(rename = "@zoneID")]
    zone_id: u32,
    #[serde(rename = "@dynamicMapID")]
    dynamic_map_id: u32,
    #[serde(rename = "@mode")]
    mode: String,
    #[serde(rename = "@timerExpirationEventID")]
    timer_expiration_event_id: String,
    #[serde(rename = "@duration")]
    duration: u32,
    #[serde(rename = "@spawnGroupIDs")]
    spawn_group_ids: String,
    #[serde(rename = "action")]
    actions: Vec<Action>,
    #[serde(rename = "defeatAction")]
    defeat_actions: Vec<Action>,
}

pub(crate) fn parse_id_list(s: &str) -> Result<Vec<u32>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| Error::Validation(format!("bad ID list entry: {part}")))
        })
        .collect()
}

impl TryFrom<ActionXml> for Action {
    type Error = Error;

    fn try_from(xml: ActionXml) -> Result<Self> {
        let kind = match xml.action_type.as_str() {
            "addRemoveItems" => ActionKind::AddRemoveItems,
            "addRemoveStatus" => ActionKind::AddRemoveStatus,
            "createLoot" => ActionKind::CreateLoot,
            "delay" => ActionKind::Delay {
                duration: xml.duration,
                actions: xml.actions,
            },
            "displayMessage" => ActionKind::DisplayMessage,
            "grantSkills" => ActionKind::GrantSkills,
            "grantXP" => ActionKind::GrantXp,
            "playBGM" => ActionKind::PlayBgm,
            "playSoundEffect" => ActionKind::PlaySoundEffect,
            "runScript" => ActionKind::RunScript {
                script_id: xml.script_id,
            },
            "setHomepoint" => ActionKind::SetHomepoint,
            "setNPCState" => ActionKind::SetNpcState,
            "specialDirection" => ActionKind::SpecialDirection,
            "spawn" => ActionKind::Spawn {
                spawn_group_ids: parse_id_list(&xml.spawn_group_ids)?,
                defeat_actions: xml.defeat_actions,
            },
            "stageEffect" => ActionKind::StageEffect,
            "startEvent" => ActionKind::StartEvent {
                event_id: xml.event_id,
            },
            "updateCOMP" => ActionKind::UpdateComp,
            "updateFlag" => ActionKind::UpdateFlag,
            "updateLNC" => ActionKind::UpdateLnc,
            "updatePoints" => ActionKind::UpdatePoints,
            "updateQuest" => ActionKind::UpdateQuest,
            "updateZoneFlags" => ActionKind::UpdateZoneFlags,
            "zoneChange" => ActionKind::ZoneChange {
                zone_id: xml.zone_id,
                dynamic_map_id: xml.dynamic_map_id,
            },
            "zoneInstance" => ActionKind::ZoneInstance {
                mode: match xml.mode.as_str() {
                    "" | "create" => ZoneInstanceMode::Create,
                    "join" => ZoneInstanceMode::Join,
                    "clanJoin" => ZoneInstanceMode::ClanJoin,
                    "teamJoin" => ZoneInstanceMode::TeamJoin,
                    "teamPVP" => ZoneInstanceMode::TeamPvp,
                    other => {
                        return Err(Error::Validation(format!(
                            "unknown zone instance mode: {other}"
                        )))
                    }
                },
                timer_expiration_event_id: xml.timer_expiration_event_id,
            },
            other => {
                return Err(Error::Validation(format!("unknown action type: {other}")))
            }
        };

        Ok(Action {
            source_context: SourceContext::parse(&xml.source_context)?,
            stop_on_failure: xml.stop_on_failure,
            on_failure_event: xml.on_failure_event,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_event_action() {
        let action: Action = quick_xml::de::from_str(
            r#"<action type="startEvent" eventID="intro_01" sourceContext="source"/>"#,
        )
        .unwrap();
        assert_eq!(
            action.kind,
            ActionKind::StartEvent {
                event_id: "intro_01".into()
            }
        );
        assert!(!action.is_player_required());
    }

    #[test]
    fn test_parse_nested_delay() {
        let action: Action = quick_xml::de::from_str(
            r#"<action type="delay" duration="500">
                 <action type="grantXP" sourceContext="source"/>
               </action>"#,
        )
        .unwrap();

        let nested = action.nested_actions();
        assert_eq!(nested.len(), 1);
        assert!(nested[0].is_player_required());
    }

    #[test]
    fn test_unknown_type_fails() {
        let result: std::result::Result<Action, _> =
            quick_xml::de::from_str(r#"<action type="fireMissiles"/>"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_player_required_set() {
        let required = [
            "addRemoveItems",
            "displayMessage",
            "grantSkills",
            "grantXP",
            "playBGM",
            "playSoundEffect",
            "setHomepoint",
            "specialDirection",
            "stageEffect",
            "updateCOMP",
            "updateFlag",
            "updateLNC",
            "updateQuest",
            "zoneChange",
            "zoneInstance",
        ];
        for name in required {
            let action: Action =
                quick_xml::de::from_str(&format!(r#"<action type="{name}"/>"#)).unwrap();
            assert!(action.is_player_required(), "{name} must require a player");
        }

        for name in ["createLoot", "setNPCState", "startEvent", "updateZoneFlags"] {
            let action: Action =
                quick_xml::de::from_str(&format!(r#"<action type="{name}"/>"#)).unwrap();
            assert!(!action.is_player_required(), "{name} must not require a player");
        }
    }

    #[test]
    fn test_all_actions_includes_nested() {
        let action: Action = quick_xml::de::from_str(
            r#"<action type="spawn" spawnGroupIDs="1,2">
                 <defeatAction type="delay" duration="10">
                   <action type="createLoot"/>
                 </defeatAction>
               </action>"#,
        )
        .unwrap();

        let actions = vec![action];
        let all = all_actions(&actions);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_id_list("").unwrap().is_empty());
        assert!(parse_id_list("1,x").is_err());
    }
}

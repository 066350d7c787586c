// Run configuration for one combat stage, read from a JSON file.
//
// Every field has a default so a config file only needs the keys it wants to
// change; `validate` catches values the orchestrator cannot work with.

use crate::core_modules::node_filter::NodeFilter;
use crate::error::ConfigError;
use crate::presets::{self, MapId};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    /// Stage to sortie into, e.g. `"3-4"` or `"E-D3"`.
    pub map: String,
    pub mob_fleet_no: u8,
    pub boss_fleet_no: u8,
    /// Hand over to the boss fleet after this many won fights.
    pub switch_fleet_after_combats: u32,
    /// Overrides the built-in kills-before-boss table when non-zero.
    pub kills_before_boss: u32,
    /// Retreat after this many won fights; 0 disables.
    pub retreat_after: u32,
    pub ignore_morale: bool,
    pub hide_subs_hunting_range: bool,
    /// Keep the second fleet in fleet selection.
    pub boss_fleet: bool,
    /// Pins the whole sortie to one fleet, ignoring the mob/boss hand-over.
    pub force_fleet_no: Option<u8>,
    pub filter_exec_order: Vec<NodeFilter>,
    pub enhancement_enabled: bool,
    pub retirement_enabled: bool,
    /// Captures voted over per map read.
    pub merge_frames: u32,
    /// Swipes tried when looking for a hidden boss.
    pub boss_swipe_max: u32,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            map: "1-1".to_string(),
            mob_fleet_no: 1,
            boss_fleet_no: 1,
            switch_fleet_after_combats: u32::MAX,
            kills_before_boss: 0,
            retreat_after: 0,
            ignore_morale: false,
            hide_subs_hunting_range: false,
            boss_fleet: false,
            force_fleet_no: None,
            filter_exec_order: Vec::new(),
            enhancement_enabled: false,
            retirement_enabled: false,
            merge_frames: 3,
            boss_swipe_max: 12,
        }
    }
}

impl CombatConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.map_id()?;
        let fleets = [
            ("mob_fleet_no", Some(self.mob_fleet_no)),
            ("boss_fleet_no", Some(self.boss_fleet_no)),
            ("force_fleet_no", self.force_fleet_no),
        ];
        for (name, fleet) in fleets.into_iter().filter_map(|(n, f)| Some((n, f?))) {
            if !(1..=2).contains(&fleet) {
                return Err(ConfigError::Invalid(format!("{name} must be 1 or 2, got {fleet}")));
            }
        }
        if self.merge_frames == 0 {
            return Err(ConfigError::Invalid("merge_frames must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn map_id(&self) -> Result<MapId, ConfigError> {
        self.map.parse()
    }

    /// Kills needed before the boss: the configured value when set, else the
    /// built-in table, else 0.
    pub fn kills_before_boss_for(&self, map: &MapId) -> u32 {
        if self.kills_before_boss != 0 {
            return self.kills_before_boss;
        }
        presets::kills_before_boss(map).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let raw = r#"{"map": "4-4", "boss_fleet_no": 2, "filter_exec_order": ["siren_first"]}"#;
        write!(file, "{raw}").unwrap();
        let config = CombatConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.map, "4-4");
        assert_eq!(config.boss_fleet_no, 2);
        assert_eq!(config.mob_fleet_no, 1);
        assert_eq!(config.merge_frames, 3);
        assert_eq!(config.filter_exec_order, vec![NodeFilter::SirenFirst]);
        assert_eq!(config.force_fleet_no, None);
        assert_eq!(config.kills_before_boss_for(&config.map_id().unwrap()), 4);
    }

    #[test]
    fn explicit_kill_count_wins_over_the_table() {
        let config = CombatConfig { kills_before_boss: 9, ..CombatConfig::default() };
        assert_eq!(config.kills_before_boss_for(&"1-1".parse().unwrap()), 9);
        let config = CombatConfig::default();
        assert_eq!(config.kills_before_boss_for(&"E-D3".parse().unwrap()), 0);
    }

    #[test]
    fn bad_values_are_rejected() {
        let config = CombatConfig { boss_fleet_no: 3, ..CombatConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = CombatConfig { map: "nowhere".into(), ..CombatConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::MapId(_))));
        let config = CombatConfig { force_fleet_no: Some(0), ..CombatConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = CombatConfig { force_fleet_no: Some(2), ..CombatConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn forced_fleet_is_read_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"force_fleet_no": 2}}"#).unwrap();
        let config = CombatConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.force_fleet_no, Some(2));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = CombatConfig::from_json_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

//! Model preset engine (spec §4.9): expands a declarative `model` tag into
//! the four-axis `(entity_kind, history_mode, input_mode, delete_mode)`
//! tuple. Grounded on `pipelines/create.py`'s pipeline-template resolution
//! and on the table in spec.md §4.9, which this module encodes exhaustively
//! rather than leaving any preset partially specified.

use crate::config::{DeleteMode, EntityKind, HistoryMode, InputMode, ModelPreset, SilverConfig};

/// The subset of axes a preset suggests. `None` means "the preset doesn't
/// opine on this axis" (only `delete_mode` is ever left unset, by the
/// non-CDC presets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDefaults {
    pub entity_kind: EntityKind,
    pub history_mode: HistoryMode,
    pub input_mode: InputMode,
    pub delete_mode: Option<DeleteMode>,
}

pub fn expand_model(preset: ModelPreset) -> ModelDefaults {
    use DeleteMode::*;
    use EntityKind::*;
    use HistoryMode::*;
    use InputMode::*;
    use ModelPreset::*;

    match preset {
        PeriodicSnapshot => ModelDefaults {
            entity_kind: State,
            history_mode: CurrentOnly,
            input_mode: ReplaceDaily,
            delete_mode: None,
        },
        FullMergeDedupe => ModelDefaults {
            entity_kind: State,
            history_mode: CurrentOnly,
            input_mode: AppendLog,
            delete_mode: None,
        },
        IncrementalMerge => ModelDefaults {
            entity_kind: State,
            history_mode: CurrentOnly,
            input_mode: AppendLog,
            delete_mode: None,
        },
        ScdType2 => ModelDefaults {
            entity_kind: State,
            history_mode: FullHistory,
            input_mode: AppendLog,
            delete_mode: None,
        },
        EventLog => ModelDefaults {
            entity_kind: Event,
            history_mode: CurrentOnly,
            input_mode: AppendLog,
            delete_mode: None,
        },
        CdcCurrent => ModelDefaults {
            entity_kind: State,
            history_mode: CurrentOnly,
            input_mode: AppendLog,
            delete_mode: Some(Ignore),
        },
        CdcCurrentTombstone => ModelDefaults {
            entity_kind: State,
            history_mode: CurrentOnly,
            input_mode: AppendLog,
            delete_mode: Some(Tombstone),
        },
        CdcCurrentHardDelete => ModelDefaults {
            entity_kind: State,
            history_mode: CurrentOnly,
            input_mode: AppendLog,
            delete_mode: Some(HardDelete),
        },
        CdcHistory => ModelDefaults {
            entity_kind: State,
            history_mode: FullHistory,
            input_mode: AppendLog,
            delete_mode: Some(Ignore),
        },
        CdcHistoryTombstone => ModelDefaults {
            entity_kind: State,
            history_mode: FullHistory,
            input_mode: AppendLog,
            delete_mode: Some(Tombstone),
        },
        CdcHistoryHardDelete => ModelDefaults {
            entity_kind: State,
            history_mode: FullHistory,
            input_mode: AppendLog,
            delete_mode: Some(HardDelete),
        },
    }
}

/// Resolved effective axes for a Silver configuration: explicit fields win
/// over the preset's suggestion, which wins over the hard-coded fallback
/// (spec §4.9 "Explicit Silver fields take precedence over preset
/// defaults").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSilverModel {
    pub entity_kind: EntityKind,
    pub history_mode: HistoryMode,
    pub input_mode: Option<InputMode>,
    pub delete_mode: DeleteMode,
}

pub fn resolve_silver_model(silver: &SilverConfig) -> ResolvedSilverModel {
    let defaults = silver.model.map(expand_model);

    let entity_kind = silver
        .entity_kind
        .or(defaults.map(|d| d.entity_kind))
        .unwrap_or_default();
    let history_mode = silver
        .history_mode
        .or(defaults.map(|d| d.history_mode))
        .unwrap_or_default();
    let input_mode = silver.input_mode.or(defaults.map(|d| d.input_mode));
    let delete_mode = silver
        .delete_mode
        .or(defaults.and_then(|d| d.delete_mode))
        .unwrap_or_default();

    ResolvedSilverModel {
        entity_kind,
        history_mode,
        input_mode,
        delete_mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_expands_without_panicking() {
        use ModelPreset::*;
        let all = [
            PeriodicSnapshot,
            FullMergeDedupe,
            IncrementalMerge,
            ScdType2,
            EventLog,
            CdcCurrent,
            CdcCurrentTombstone,
            CdcCurrentHardDelete,
            CdcHistory,
            CdcHistoryTombstone,
            CdcHistoryHardDelete,
        ];
        for preset in all {
            let defaults = expand_model(preset);
            if preset.requires_cdc_bronze() {
                assert!(defaults.delete_mode.is_some());
            }
        }
    }

    #[test]
    fn cdc_presets_require_cdc_bronze_flag() {
        assert!(ModelPreset::CdcCurrent.requires_cdc_bronze());
        assert!(!ModelPreset::ScdType2.requires_cdc_bronze());
    }

    #[test]
    fn explicit_fields_override_preset_defaults() {
        let silver = SilverConfig {
            natural_keys: vec!["id".into()],
            change_timestamp: Some("ts".into()),
            attributes: None,
            exclude_columns: None,
            column_mapping: Default::default(),
            entity_kind: Some(EntityKind::Event),
            history_mode: None,
            delete_mode: None,
            input_mode: None,
            model: Some(ModelPreset::ScdType2),
            cdc_options: Default::default(),
            source_path: String::new(),
            target_path: String::new(),
        };
        let resolved = resolve_silver_model(&silver);
        // ScdType2 suggests State, but explicit entity_kind=Event wins.
        assert_eq!(resolved.entity_kind, EntityKind::Event);
        assert_eq!(resolved.history_mode, HistoryMode::FullHistory);
    }
}

//! Editor configuration, populated from environment variables.

/// Whether the editor currently offers authoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditorMode {
    /// Edits are tracked and validated.
    #[default]
    Authoring,
    /// The diagram is shown as-is; authoring tools are unavailable.
    Readonly,
}

/// Formats the mode as its lowercase name (e.g. `"authoring"`).
impl std::fmt::Display for EditorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorMode::Authoring => write!(f, "authoring"),
            EditorMode::Readonly => write!(f, "readonly"),
        }
    }
}

/// Parses an [`EditorMode`] from its lowercase name.
impl std::str::FromStr for EditorMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authoring" => Ok(EditorMode::Authoring),
            "readonly" => Ok(EditorMode::Readonly),
            _ => Err(format!(
                "unknown editor mode {:?}; expected one of: authoring, readonly",
                s
            )),
        }
    }
}

/// Runtime configuration for an [`EditorController`](crate::EditorController).
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `GWEAVE_HISTORY_DEPTH` | `100` | Undo units kept in history |
/// | `GWEAVE_MODE` | `authoring` | Initial mode: `authoring` or `readonly` |
#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Maximum number of undo units kept.
    pub history_depth: usize,

    /// Mode the editor starts in.
    pub mode: EditorMode,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_depth: 100,
            mode: EditorMode::Authoring,
        }
    }
}

impl EditorConfig {
    /// Populate config from environment variables, applying defaults where
    /// absent or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let history_depth = std::env::var("GWEAVE_HISTORY_DEPTH")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.history_depth);

        let mode = std::env::var("GWEAVE_MODE")
            .ok()
            .and_then(|v| v.parse::<EditorMode>().ok())
            .unwrap_or(defaults.mode);

        Self {
            history_depth,
            mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [EditorMode::Authoring, EditorMode::Readonly] {
            assert_eq!(mode.to_string().parse::<EditorMode>(), Ok(mode));
        }
        assert!("editing".parse::<EditorMode>().is_err());
    }

    #[test]
    fn defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.history_depth, 100);
        assert_eq!(config.mode, EditorMode::Authoring);
    }
}

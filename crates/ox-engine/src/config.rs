use camino::Utf8PathBuf;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Store root; artifacts live under `<root>/fs-data/<storeVersion>/`.
    pub root: Utf8PathBuf,
    /// Keep scratch directories when an execution fails, for forensic
    /// inspection. The default is to remove them.
    pub keep_scratch: bool,
}

impl EngineConfig {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_scratch: false,
        }
    }

    pub fn keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }
}

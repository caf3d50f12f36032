use crate::jvm::Version;

pub struct Settings {
    /// Class file version the methods target
    ///
    /// Opcodes (and loadable constants) that don't exist in this version are reported.
    pub version: Version,

    /// Allow locals to be referred to by name (`iload count`) instead of by slot
    pub symbolic_locals: bool,

    /// Warn about locals that are written but never read
    pub warn_unused: bool,

    /// Number of local slots available, if it should be smaller than what `max_locals` can hold
    pub max_locals: Option<u16>,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            version: Version::JAVA17,
            symbolic_locals: false,
            warn_unused: false,
            max_locals: None,
        }
    }

    /// Slots the local variable tracker may hand out
    pub fn locals_limit(&self) -> usize {
        self.max_locals.unwrap_or(u16::MAX) as usize
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}

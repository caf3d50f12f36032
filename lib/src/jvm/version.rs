/// Version of the class file the method is assembled for
///
/// Some opcodes only exist from a given version (`invokedynamic`) and some were retired
/// (`jsr`/`ret` can't appear in classes that need stack map frames).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub major_version: u16,
    pub minor_version: u16,
}

impl Version {
    pub const fn new(major_version: u16) -> Version {
        Version {
            major_version,
            minor_version: 0,
        }
    }

    /// JDK 1.1, the oldest version with a stable instruction set
    pub const JAVA1: Version = Version::new(45);

    /// Java SE 6 (last version where `jsr`/`ret` are allowed)
    pub const JAVA6: Version = Version::new(50);

    /// Java SE 7 (introduces `invokedynamic` and mandatory stack map frames)
    pub const JAVA7: Version = Version::new(51);

    /// Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version::new(52);

    pub const JAVA11: Version = Version::new(55);
    pub const JAVA17: Version = Version::new(61);

    /// Parse a release number (`8`, `17`, or the legacy `1.6` spelling)
    pub fn from_release(release: &str) -> Option<Version> {
        let release = release.strip_prefix("1.").unwrap_or(release);
        let number: u16 = release.parse().ok()?;
        match number {
            1 => Some(Version::JAVA1),
            2..=30 => Some(Version::new(44 + number)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn releases() {
        assert_eq!(Version::from_release("1.6"), Some(Version::JAVA6));
        assert_eq!(Version::from_release("7"), Some(Version::JAVA7));
        assert_eq!(Version::from_release("17"), Some(Version::JAVA17));
        assert_eq!(Version::from_release("seventeen"), None);
        assert!(Version::JAVA6 < Version::JAVA7);
    }
}

use bitflags::bitflags;

bitflags! {
    /// Access flags on methods
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6-200-A.1
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

impl MethodAccessFlags {
    /// Flag for a modifier keyword as it appears in a method header (eg. `static`)
    pub fn from_keyword(keyword: &str) -> Option<MethodAccessFlags> {
        let flag = match keyword {
            "public" => MethodAccessFlags::PUBLIC,
            "private" => MethodAccessFlags::PRIVATE,
            "protected" => MethodAccessFlags::PROTECTED,
            "static" => MethodAccessFlags::STATIC,
            "final" => MethodAccessFlags::FINAL,
            "synchronized" => MethodAccessFlags::SYNCHRONIZED,
            "bridge" => MethodAccessFlags::BRIDGE,
            "varargs" => MethodAccessFlags::VARARGS,
            "native" => MethodAccessFlags::NATIVE,
            "abstract" => MethodAccessFlags::ABSTRACT,
            "strict" => MethodAccessFlags::STRICT,
            "synthetic" => MethodAccessFlags::SYNTHETIC,
            _ => return None,
        };
        Some(flag)
    }

    /// Does the method have a receiver in local slot 0?
    pub fn has_receiver(&self) -> bool {
        !self.contains(MethodAccessFlags::STATIC)
    }
}

//! The closed set of architecture tags a container can carry.

use crate::error::{Error, Result};
use std::fmt;

/// Width of the on-disk architecture code: two ASCII digits and a NUL.
pub(crate) const ARCH_CODE_LEN: usize = 3;

/// CPU architecture of the primary system partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    /// No primary system partition, or an unrecognized architecture.
    Unknown,
    /// 32-bit x86
    I386,
    /// 64-bit x86
    Amd64,
    /// 32-bit ARM
    Arm,
    /// 64-bit ARM
    Arm64,
    /// 64-bit PowerPC, big-endian
    Ppc64,
    /// 64-bit PowerPC, little-endian
    Ppc64Le,
    /// 32-bit MIPS, big-endian
    Mips,
    /// 32-bit MIPS, little-endian
    MipsLe,
    /// 64-bit MIPS, big-endian
    Mips64,
    /// 64-bit MIPS, little-endian
    Mips64Le,
    /// IBM z/Architecture
    S390x,
}

impl Arch {
    /// The conventional short name, e.g. `amd64`.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::I386 => "386",
            Arch::Amd64 => "amd64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::Ppc64 => "ppc64",
            Arch::Ppc64Le => "ppc64le",
            Arch::Mips => "mips",
            Arch::MipsLe => "mipsle",
            Arch::Mips64 => "mips64",
            Arch::Mips64Le => "mips64le",
            Arch::S390x => "s390x",
        }
    }

    /// Look up an architecture by its short name. Unrecognized names map to
    /// [`Arch::Unknown`].
    pub fn from_name(name: &str) -> Arch {
        match name {
            "386" => Arch::I386,
            "amd64" => Arch::Amd64,
            "arm" => Arch::Arm,
            "arm64" => Arch::Arm64,
            "ppc64" => Arch::Ppc64,
            "ppc64le" => Arch::Ppc64Le,
            "mips" => Arch::Mips,
            "mipsle" => Arch::MipsLe,
            "mips64" => Arch::Mips64,
            "mips64le" => Arch::Mips64Le,
            "s390x" => Arch::S390x,
            _ => Arch::Unknown,
        }
    }

    /// The on-disk header code.
    pub(crate) fn code(self) -> &'static [u8; ARCH_CODE_LEN] {
        match self {
            Arch::Unknown => b"00\0",
            Arch::I386 => b"01\0",
            Arch::Amd64 => b"02\0",
            Arch::Arm => b"03\0",
            Arch::Arm64 => b"04\0",
            Arch::Ppc64 => b"05\0",
            Arch::Ppc64Le => b"06\0",
            Arch::Mips => b"07\0",
            Arch::MipsLe => b"08\0",
            Arch::Mips64 => b"09\0",
            Arch::Mips64Le => b"10\0",
            Arch::S390x => b"11\0",
        }
    }

    pub(crate) fn from_code(code: &[u8]) -> Result<Arch> {
        match code {
            b"00\0" => Ok(Arch::Unknown),
            b"01\0" => Ok(Arch::I386),
            b"02\0" => Ok(Arch::Amd64),
            b"03\0" => Ok(Arch::Arm),
            b"04\0" => Ok(Arch::Arm64),
            b"05\0" => Ok(Arch::Ppc64),
            b"06\0" => Ok(Arch::Ppc64Le),
            b"07\0" => Ok(Arch::Mips),
            b"08\0" => Ok(Arch::MipsLe),
            b"09\0" => Ok(Arch::Mips64),
            b"10\0" => Ok(Arch::Mips64Le),
            b"11\0" => Ok(Arch::S390x),
            other => Err(Error::Format(format!(
                "unrecognized architecture code {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        let all = [
            Arch::Unknown,
            Arch::I386,
            Arch::Amd64,
            Arch::Arm,
            Arch::Arm64,
            Arch::Ppc64,
            Arch::Ppc64Le,
            Arch::Mips,
            Arch::MipsLe,
            Arch::Mips64,
            Arch::Mips64Le,
            Arch::S390x,
        ];
        for arch in all {
            let decoded = Arch::from_code(arch.code()).expect("known code should decode");
            assert_eq!(arch, decoded, "arch should round-trip through its code");
        }
        assert!(Arch::from_code(b"99\0").is_err(), "unknown code should fail");
    }

    #[test]
    fn name_round_trip() {
        assert_eq!(Arch::from_name("amd64"), Arch::Amd64);
        assert_eq!(Arch::from_name("pdp11"), Arch::Unknown);
        assert_eq!(Arch::Mips64Le.name(), "mips64le");
    }
}

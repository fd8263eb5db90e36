//! Code-signing status flags (`csops(CS_OPS_STATUS)`).
//!
//! A process is expected to carry every flag in [`REQUIRED_SECURE`] and none
//! of [`INSECURE`]. Either violation fails the check.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `csops` operation returning the status bitmask.
pub const CS_OPS_STATUS: u32 = 0;

/// One code-signing status flag from xnu `cs_blobs.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(non_camel_case_types, missing_docs)]
pub enum CsFlag {
    CS_VALID,
    CS_ADHOC,
    CS_GET_TASK_ALLOW,
    CS_INSTALLER,
    CS_HARD,
    CS_KILL,
    CS_CHECK_EXPIRATION,
    CS_RESTRICT,
    CS_ENFORCEMENT,
    CS_REQUIRE_LV,
    CS_ENTITLEMENTS_VALIDATED,
    CS_NVRAM_UNRESTRICTED,
    CS_EXEC_SET_HARD,
    CS_EXEC_SET_KILL,
    CS_EXEC_SET_ENFORCEMENT,
    CS_EXEC_INHERIT_SIP,
    CS_KILLED,
    CS_DYLD_PLATFORM,
    CS_PLATFORM_BINARY,
    CS_PLATFORM_PATH,
    CS_DEBUGGED,
    CS_SIGNED,
    CS_DEV_CODE,
    CS_DATAVAULT_CONTROLLER,
}

/// Flags a healthy signed process must carry.
pub const REQUIRED_SECURE: [CsFlag; 7] = [
    CsFlag::CS_VALID,
    CsFlag::CS_HARD,
    CsFlag::CS_KILL,
    CsFlag::CS_ENFORCEMENT,
    CsFlag::CS_REQUIRE_LV,
    CsFlag::CS_DYLD_PLATFORM,
    CsFlag::CS_SIGNED,
];

/// Flags whose presence indicates a privileged or debugged process.
pub const INSECURE: [CsFlag; 3] = [
    CsFlag::CS_INSTALLER,
    CsFlag::CS_PLATFORM_BINARY,
    CsFlag::CS_DEBUGGED,
];

impl CsFlag {
    /// Every flag in ascending bit order.
    pub const ALL: [CsFlag; 24] = [
        Self::CS_VALID,
        Self::CS_ADHOC,
        Self::CS_GET_TASK_ALLOW,
        Self::CS_INSTALLER,
        Self::CS_HARD,
        Self::CS_KILL,
        Self::CS_CHECK_EXPIRATION,
        Self::CS_RESTRICT,
        Self::CS_ENFORCEMENT,
        Self::CS_REQUIRE_LV,
        Self::CS_ENTITLEMENTS_VALIDATED,
        Self::CS_NVRAM_UNRESTRICTED,
        Self::CS_EXEC_SET_HARD,
        Self::CS_EXEC_SET_KILL,
        Self::CS_EXEC_SET_ENFORCEMENT,
        Self::CS_EXEC_INHERIT_SIP,
        Self::CS_KILLED,
        Self::CS_DYLD_PLATFORM,
        Self::CS_PLATFORM_BINARY,
        Self::CS_PLATFORM_PATH,
        Self::CS_DEBUGGED,
        Self::CS_SIGNED,
        Self::CS_DEV_CODE,
        Self::CS_DATAVAULT_CONTROLLER,
    ];

    /// Bit value.
    pub fn bits(self) -> u32 {
        match self {
            Self::CS_VALID => 0x0000_0001,
            Self::CS_ADHOC => 0x0000_0002,
            Self::CS_GET_TASK_ALLOW => 0x0000_0004,
            Self::CS_INSTALLER => 0x0000_0008,
            Self::CS_HARD => 0x0000_0100,
            Self::CS_KILL => 0x0000_0200,
            Self::CS_CHECK_EXPIRATION => 0x0000_0400,
            Self::CS_RESTRICT => 0x0000_0800,
            Self::CS_ENFORCEMENT => 0x0000_1000,
            Self::CS_REQUIRE_LV => 0x0000_2000,
            Self::CS_ENTITLEMENTS_VALIDATED => 0x0000_4000,
            Self::CS_NVRAM_UNRESTRICTED => 0x0000_8000,
            Self::CS_EXEC_SET_HARD => 0x0010_0000,
            Self::CS_EXEC_SET_KILL => 0x0020_0000,
            Self::CS_EXEC_SET_ENFORCEMENT => 0x0040_0000,
            Self::CS_EXEC_INHERIT_SIP => 0x0080_0000,
            Self::CS_KILLED => 0x0100_0000,
            Self::CS_DYLD_PLATFORM => 0x0200_0000,
            Self::CS_PLATFORM_BINARY => 0x0400_0000,
            Self::CS_PLATFORM_PATH => 0x0800_0000,
            Self::CS_DEBUGGED => 0x1000_0000,
            Self::CS_SIGNED => 0x2000_0000,
            Self::CS_DEV_CODE => 0x4000_0000,
            Self::CS_DATAVAULT_CONTROLLER => 0x8000_0000,
        }
    }

    /// Human-readable meaning.
    pub fn description(self) -> &'static str {
        match self {
            Self::CS_VALID => "Dynamically valid",
            Self::CS_ADHOC => "Ad hoc signed",
            Self::CS_GET_TASK_ALLOW => "Has get-task-allow entitlement",
            Self::CS_INSTALLER => "Has installer entitlement",
            Self::CS_HARD => "Don't load invalid pages",
            Self::CS_KILL => "Kill process if it becomes invalid",
            Self::CS_CHECK_EXPIRATION => "Force expiration checking",
            Self::CS_RESTRICT => "Tell dyld to treat restricted",
            Self::CS_ENFORCEMENT => "Require enforcement",
            Self::CS_REQUIRE_LV => "Require library validation",
            Self::CS_ENTITLEMENTS_VALIDATED => "Code signature permits restricted entitlements",
            Self::CS_NVRAM_UNRESTRICTED => "Has restricted NVRAM variables entitlement",
            Self::CS_EXEC_SET_HARD => "Set CS_HARD on any exec'ed process",
            Self::CS_EXEC_SET_KILL => "Set CS_KILL on any exec'ed process",
            Self::CS_EXEC_SET_ENFORCEMENT => "Set CS_ENFORCEMENT on any exec'ed process",
            Self::CS_EXEC_INHERIT_SIP => "Set CS_INSTALLER on any exec'ed process",
            Self::CS_KILLED => "Was killed by kernel for invalidity",
            Self::CS_DYLD_PLATFORM => "Dyld used to load this is a platform binary",
            Self::CS_PLATFORM_BINARY => "This is a platform binary",
            Self::CS_PLATFORM_PATH => "Platform binary by the fact of path",
            Self::CS_DEBUGGED => "Process is or has been debugged with invalid pages",
            Self::CS_SIGNED => "Process has a signature (may have gone invalid)",
            Self::CS_DEV_CODE => "Code is dev signed",
            Self::CS_DATAVAULT_CONTROLLER => "Has Data Vault controller entitlement",
        }
    }

    /// Whether the flag belongs to [`REQUIRED_SECURE`].
    pub fn is_required(self) -> bool {
        REQUIRED_SECURE.contains(&self)
    }

    /// Whether the flag belongs to [`INSECURE`].
    pub fn is_insecure(self) -> bool {
        INSECURE.contains(&self)
    }
}

impl fmt::Display for CsFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Raw status bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsFlags(pub u32);

impl CsFlags {
    /// Build a mask from a list of flags.
    pub fn from_flags(flags: &[CsFlag]) -> Self {
        Self(flags.iter().fold(0, |acc, flag| acc | flag.bits()))
    }

    /// Whether `flag` is set.
    pub fn contains(self, flag: CsFlag) -> bool {
        self.0 & flag.bits() != 0
    }

    /// A copy with `flag` cleared.
    pub fn without(self, flag: CsFlag) -> Self {
        Self(self.0 & !flag.bits())
    }

    /// A copy with `flag` set.
    pub fn with(self, flag: CsFlag) -> Self {
        Self(self.0 | flag.bits())
    }
}

/// Display bucket of a flag in the evidence list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CsFlagGroup {
    /// Present and not insecure.
    SecurePresent,
    /// Present and insecure.
    InsecurePresent,
    /// Required but absent.
    RequiredMissing,
    /// Absent and not required.
    OptionalMissing,
}

/// Evaluation of one flag against the reference sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsFlagStatus {
    /// The flag.
    pub flag: CsFlag,
    /// Member of the required set.
    pub is_required: bool,
    /// Member of the insecure set.
    pub is_insecure: bool,
    /// Set in the process mask.
    pub is_present: bool,
}

impl CsFlagStatus {
    /// Whether this flag alone fails the check.
    pub fn is_violation(&self) -> bool {
        (self.is_required && !self.is_present) || (self.is_present && self.is_insecure)
    }

    /// Display bucket.
    pub fn group(&self) -> CsFlagGroup {
        match (self.is_present, self.is_insecure, self.is_required) {
            (true, true, _) => CsFlagGroup::InsecurePresent,
            (true, false, _) => CsFlagGroup::SecurePresent,
            (false, _, true) => CsFlagGroup::RequiredMissing,
            (false, _, false) => CsFlagGroup::OptionalMissing,
        }
    }
}

/// Evaluate every flag in bit order.
pub fn evaluate(flags: CsFlags) -> Vec<CsFlagStatus> {
    CsFlag::ALL
        .iter()
        .map(|&flag| CsFlagStatus {
            flag,
            is_required: flag.is_required(),
            is_insecure: flag.is_insecure(),
            is_present: flags.contains(flag),
        })
        .collect()
}

/// Whether the mask satisfies both reference sets.
pub fn is_expected(flags: CsFlags) -> bool {
    !evaluate(flags).iter().any(CsFlagStatus::is_violation)
}

/// Every flag grouped for display: secure present, insecure present,
/// required missing, optional missing. Bit order is kept within a group.
pub fn explain(flags: CsFlags) -> Vec<CsFlagStatus> {
    let mut statuses = evaluate(flags);
    statuses.sort_by_key(CsFlagStatus::group);
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_set_passes() {
        assert!(is_expected(CsFlags::from_flags(&REQUIRED_SECURE)));
    }

    #[test]
    fn test_missing_valid_fails() {
        let flags = CsFlags::from_flags(&REQUIRED_SECURE).without(CsFlag::CS_VALID);
        assert!(!is_expected(flags));
        let missing: Vec<_> = explain(flags)
            .into_iter()
            .filter(|s| s.group() == CsFlagGroup::RequiredMissing)
            .map(|s| s.flag)
            .collect();
        assert_eq!(missing, vec![CsFlag::CS_VALID]);
    }

    #[test]
    fn test_insecure_flag_fails() {
        let flags = CsFlags::from_flags(&REQUIRED_SECURE).with(CsFlag::CS_DEBUGGED);
        assert!(!is_expected(flags));
    }

    #[test]
    fn test_explain_group_order_is_stable() {
        let flags = CsFlags::from_flags(&[CsFlag::CS_VALID, CsFlag::CS_DEBUGGED]);
        let groups: Vec<_> = explain(flags).iter().map(CsFlagStatus::group).collect();
        let mut sorted = groups.clone();
        sorted.sort();
        assert_eq!(groups, sorted);
        assert_eq!(groups.len(), CsFlag::ALL.len());
        assert_eq!(explain(flags)[0].flag, CsFlag::CS_VALID);
    }

    #[test]
    fn test_bits_are_unique() {
        let mask = CsFlag::ALL.iter().fold(0u32, |acc, f| {
            assert_eq!(acc & f.bits(), 0);
            acc | f.bits()
        });
        assert_eq!(mask.count_ones(), 24);
    }
}

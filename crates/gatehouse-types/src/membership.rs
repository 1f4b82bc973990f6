use serde::{Deserialize, Serialize};

/// Raw member status as the platform reports it for a (channel, user) pair.
/// Parsed once at the oracle boundary; everything past that boundary only
/// ever sees `Membership`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
    /// Statuses this build does not know about. A confirmed answer either
    /// way, so it counts as non-membership rather than an outage.
    #[serde(other)]
    Other,
}

impl MemberStatus {
    pub fn grants_membership(self) -> bool {
        matches!(
            self,
            MemberStatus::Creator | MemberStatus::Administrator | MemberStatus::Member
        )
    }
}

/// Tri-state membership answer. `Unknown` means the platform could not be
/// asked (timeout, transport failure) and must never downgrade access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
    Unknown,
}

impl From<MemberStatus> for Membership {
    fn from(status: MemberStatus) -> Self {
        if status.grants_membership() {
            Membership::Member
        } else {
            Membership::NotMember
        }
    }
}

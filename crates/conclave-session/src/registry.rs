//! Site identity assignment and membership tracking for one portal.

use crate::message::MembershipStatus;
use conclave_text::SiteId;
use std::collections::HashMap;

/// Tracks every site that has ever joined a portal. Records are retained
/// until the portal itself is disposed, so messages from departed sites
/// are recognized and ignored instead of failing on an unknown sender.
#[derive(Clone, Debug)]
pub struct SiteRegistry {
    local: SiteId,
    next_guest: u32,
    sites: HashMap<SiteId, MembershipStatus>,
}

impl SiteRegistry {
    /// Registry for a hosting site. The host is always site 1.
    pub fn host() -> Self {
        let mut sites = HashMap::new();
        sites.insert(SiteId::HOST, MembershipStatus::Active);
        Self {
            local: SiteId::HOST,
            next_guest: 2,
            sites,
        }
    }

    /// Registry for a guest, mirrored from the host's join snapshot.
    pub fn guest(local: SiteId, records: Vec<(SiteId, MembershipStatus)>) -> Self {
        let mut sites: HashMap<SiteId, MembershipStatus> = records.into_iter().collect();
        sites.entry(local).or_insert(MembershipStatus::Active);
        let next_guest = sites.keys().map(|s| s.0 + 1).max().unwrap_or(2);
        Self {
            local,
            next_guest,
            sites,
        }
    }

    pub fn local_site(&self) -> SiteId {
        self.local
    }

    /// Assign the next guest site id. Ids strictly increase and are never
    /// reused within a portal's lifetime. Host side only.
    pub fn allocate_guest(&mut self) -> SiteId {
        let site = SiteId(self.next_guest);
        self.next_guest += 1;
        self.sites.insert(site, MembershipStatus::Active);
        site
    }

    /// Record a membership transition. Returns whether anything changed.
    /// Departure is sticky: once a site is Left or Disconnected, later
    /// records for it are ignored. A voluntary leave is always followed by
    /// a transport-level disconnect, which must not rewrite the reason.
    pub fn record(&mut self, site: SiteId, status: MembershipStatus) -> bool {
        match self.sites.get(&site) {
            Some(current) if *current == status => false,
            Some(MembershipStatus::Left) | Some(MembershipStatus::Disconnected) => false,
            _ => {
                if site.0 >= self.next_guest {
                    self.next_guest = site.0 + 1;
                }
                self.sites.insert(site, status);
                true
            }
        }
    }

    pub fn status(&self, site: SiteId) -> Option<MembershipStatus> {
        self.sites.get(&site).copied()
    }

    pub fn is_active(&self, site: SiteId) -> bool {
        self.status(site) == Some(MembershipStatus::Active)
    }

    pub fn active_sites(&self) -> Vec<SiteId> {
        let mut sites: Vec<SiteId> = self
            .sites
            .iter()
            .filter(|(_, status)| **status == MembershipStatus::Active)
            .map(|(site, _)| *site)
            .collect();
        sites.sort_unstable();
        sites
    }

    pub fn snapshot(&self) -> Vec<(SiteId, MembershipStatus)> {
        let mut records: Vec<(SiteId, MembershipStatus)> =
            self.sites.iter().map(|(s, m)| (*s, *m)).collect();
        records.sort_unstable_by_key(|(s, _)| *s);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_registry_assigns_ascending_guest_ids() {
        let mut registry = SiteRegistry::host();
        assert_eq!(registry.allocate_guest(), SiteId(2));
        assert_eq!(registry.allocate_guest(), SiteId(3));
        assert_eq!(registry.active_sites(), vec![SiteId(1), SiteId(2), SiteId(3)]);
    }

    #[test]
    fn test_ids_are_not_reused_after_leave() {
        let mut registry = SiteRegistry::host();
        let guest = registry.allocate_guest();
        assert!(registry.record(guest, MembershipStatus::Left));
        assert_eq!(registry.allocate_guest(), SiteId(3));
        // The departed record is retained.
        assert_eq!(registry.status(guest), Some(MembershipStatus::Left));
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut registry = SiteRegistry::host();
        let guest = registry.allocate_guest();
        assert!(registry.record(guest, MembershipStatus::Left));
        assert!(!registry.record(guest, MembershipStatus::Left));
        // Departure is sticky: neither a stale Active nor the follow-up
        // transport disconnect rewrites it.
        assert!(!registry.record(guest, MembershipStatus::Active));
        assert!(!registry.record(guest, MembershipStatus::Disconnected));
        assert_eq!(registry.status(guest), Some(MembershipStatus::Left));
    }

    #[test]
    fn test_guest_registry_mirrors_snapshot() {
        let registry = SiteRegistry::guest(
            SiteId(3),
            vec![
                (SiteId(1), MembershipStatus::Active),
                (SiteId(2), MembershipStatus::Left),
                (SiteId(3), MembershipStatus::Active),
            ],
        );
        assert_eq!(registry.local_site(), SiteId(3));
        assert!(registry.is_active(SiteId(1)));
        assert!(!registry.is_active(SiteId(2)));
    }
}

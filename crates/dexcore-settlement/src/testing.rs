//! In-memory collaborators for tests.

use dexcore_types::testing::{AttributeTable, FixedAuthority, MemBank, RecordingNavs};
use dexcore_types::{AttributeKeeper, AuthorityKeeper, BankKeeper, HoldKeeper, NavRecorder};

use crate::engine::Collaborators;

/// One bank serving as both custody and escrow, plus the other fakes.
#[derive(Debug, Clone)]
pub struct TestServices {
    pub bank: MemBank,
    pub attributes: AttributeTable,
    pub navs: RecordingNavs,
    pub authority: FixedAuthority,
}

impl TestServices {
    #[must_use]
    pub fn new(authority: &str) -> Self {
        Self {
            bank: MemBank::new(),
            attributes: AttributeTable::new(),
            navs: RecordingNavs::new(),
            authority: FixedAuthority::new(authority),
        }
    }
}

impl Collaborators for TestServices {
    fn holds(&mut self) -> &mut dyn HoldKeeper {
        &mut self.bank
    }

    fn bank(&mut self) -> &mut dyn BankKeeper {
        &mut self.bank
    }

    fn attributes(&self) -> &dyn AttributeKeeper {
        &self.attributes
    }

    fn navs(&mut self) -> &mut dyn NavRecorder {
        &mut self.navs
    }

    fn authority(&self) -> &dyn AuthorityKeeper {
        &self.authority
    }
}

use serde::{Deserialize, Serialize};

/// Права доступа пользователя к базе данных
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Pragma,
    Vacuum,
    Attach,
    /// Все права
    All,
}

impl Privilege {
    const fn bit(self) -> u16 {
        match self {
            Self::Select => 1 << 0,
            Self::Insert => 1 << 1,
            Self::Update => 1 << 2,
            Self::Delete => 1 << 3,
            Self::Create => 1 << 4,
            Self::Alter => 1 << 5,
            Self::Drop => 1 << 6,
            Self::Pragma => 1 << 7,
            Self::Vacuum => 1 << 8,
            Self::Attach => 1 << 9,
            Self::All => 1 << 10,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "SELECT" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "CREATE" => Some(Self::Create),
            "ALTER" => Some(Self::Alter),
            "DROP" => Some(Self::Drop),
            "PRAGMA" => Some(Self::Pragma),
            "VACUUM" => Some(Self::Vacuum),
            "ATTACH" => Some(Self::Attach),
            "ALL" => Some(Self::All),
            _ => None,
        }
    }
}

impl std::fmt::Display for Privilege {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Pragma => "PRAGMA",
            Self::Vacuum => "VACUUM",
            Self::Attach => "ATTACH",
            Self::All => "ALL",
        };
        f.write_str(name)
    }
}

/// Набор прав (User x Database) в виде битовой маски
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrivilegeSet(u16);

impl PrivilegeSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self(Privilege::All.bit())
    }

    #[must_use]
    pub fn of(privileges: &[Privilege]) -> Self {
        let mut set = Self::empty();
        for p in privileges {
            set.grant(*p);
        }
        set
    }

    pub fn grant(&mut self, privilege: Privilege) {
        self.0 |= privilege.bit();
    }

    /// REVOKE ALL clears everything; revoking one capability from ALL leaves the others
    pub fn revoke(&mut self, privilege: Privilege) {
        if privilege == Privilege::All {
            self.0 = 0;
            return;
        }
        if self.0 & Privilege::All.bit() != 0 {
            self.0 = EXPANDED_ALL;
        }
        self.0 &= !privilege.bit();
    }

    #[must_use]
    pub const fn contains(self, privilege: Privilege) -> bool {
        self.0 & Privilege::All.bit() != 0 || self.0 & privilege.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

const EXPANDED_ALL: u16 = (1 << 10) - 1;

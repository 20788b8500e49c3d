use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of personal data a job moves between services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Calendar,
    Contacts,
    Mail,
    Photos,
    Tasks,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Calendar,
        DataType::Contacts,
        DataType::Mail,
        DataType::Photos,
        DataType::Tasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Calendar => "CALENDAR",
            DataType::Contacts => "CONTACTS",
            DataType::Mail => "MAIL",
            DataType::Photos => "PHOTOS",
            DataType::Tasks => "TASKS",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDataType(pub String);

impl fmt::Display for UnknownDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data type '{}'", self.0)
    }
}

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|data_type| data_type.as_str() == s)
            .ok_or_else(|| UnknownDataType(s.to_string()))
    }
}

/// Internal job identifier. Random, so nothing about it is sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque, service-specific authorization material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthData(String);

impl AuthData {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for AuthData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthData(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Export,
    Import,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Export => write!(f, "export"),
            Side::Import => write!(f, "import"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct SideAuth {
    initial: Option<AuthData>,
    last: Option<AuthData>,
}

/// One user-initiated data move.
///
/// Identity and selection are fixed at construction; only auth data mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: JobId,
    data_type: DataType,
    export_service: String,
    import_service: String,
    export_auth: SideAuth,
    import_auth: SideAuth,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Raw column values as persisted by a job store.
pub struct JobRecord {
    pub id: JobId,
    pub data_type: DataType,
    pub export_service: String,
    pub import_service: String,
    pub export_initial_auth_data: Option<AuthData>,
    pub export_auth_data: Option<AuthData>,
    pub import_initial_auth_data: Option<AuthData>,
    pub import_auth_data: Option<AuthData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        data_type: DataType,
        export_service: impl Into<String>,
        import_service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            data_type,
            export_service: export_service.into(),
            import_service: import_service.into(),
            export_auth: SideAuth::default(),
            import_auth: SideAuth::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_record(record: JobRecord) -> Self {
        Self {
            id: record.id,
            data_type: record.data_type,
            export_service: record.export_service,
            import_service: record.import_service,
            export_auth: SideAuth {
                initial: record.export_initial_auth_data,
                last: record.export_auth_data,
            },
            import_auth: SideAuth {
                initial: record.import_initial_auth_data,
                last: record.import_auth_data,
            },
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn export_service(&self) -> &str {
        &self.export_service
    }

    pub fn import_service(&self) -> &str {
        &self.import_service
    }

    pub fn service(&self, side: Side) -> &str {
        match side {
            Side::Export => &self.export_service,
            Side::Import => &self.import_service,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Seed data stored right after the authorization URL was generated.
    pub fn initial_auth_data(&self, side: Side) -> Option<&AuthData> {
        self.auth(side).initial.as_ref()
    }

    /// Final data stored once the authorization callback completed.
    pub fn auth_data(&self, side: Side) -> Option<&AuthData> {
        self.auth(side).last.as_ref()
    }

    pub fn set_initial_auth_data(&mut self, side: Side, data: AuthData) {
        self.auth_mut(side).initial = Some(data);
        self.updated_at = Utc::now();
    }

    pub fn set_auth_data(&mut self, side: Side, data: AuthData) {
        self.auth_mut(side).last = Some(data);
        self.updated_at = Utc::now();
    }

    pub fn selection_matches(
        &self,
        data_type: DataType,
        export_service: &str,
        import_service: &str,
    ) -> bool {
        self.data_type == data_type
            && self.export_service == export_service
            && self.import_service == import_service
    }

    pub fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id,
            data_type: self.data_type,
            export_service: self.export_service.clone(),
            import_service: self.import_service.clone(),
            export_initial_auth_data: self.export_auth.initial.clone(),
            export_auth_data: self.export_auth.last.clone(),
            import_initial_auth_data: self.import_auth.initial.clone(),
            import_auth_data: self.import_auth.last.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn auth(&self, side: Side) -> &SideAuth {
        match side {
            Side::Export => &self.export_auth,
            Side::Import => &self.import_auth,
        }
    }

    fn auth_mut(&mut self, side: Side) -> &mut SideAuth {
        match side {
            Side::Export => &mut self.export_auth,
            Side::Import => &mut self.import_auth,
        }
    }
}

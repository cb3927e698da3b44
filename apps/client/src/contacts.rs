//! Device address book matched against registered profiles.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shared_proto::Profile;
use thiserror::Error;
use uuid::Uuid;

pub const INVITE_LINK: &str = "https://thundertalk.app";

#[derive(Debug, Error)]
pub enum ContactsError {
    #[error("access to contacts was denied")]
    PermissionDenied,

    #[error("cannot read contacts: {0}")]
    Io(#[from] io::Error),

    #[error("invalid contacts export: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceContact {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl DeviceContact {
    pub fn primary_phone(&self) -> Option<&str> {
        self.phone_numbers.first().map(String::as_str)
    }

    fn is_reachable(&self) -> bool {
        !self.name.trim().is_empty() && (!self.phone_numbers.is_empty() || self.email.is_some())
    }

    fn normalized(mut self) -> Self {
        self.phone_numbers = self
            .phone_numbers
            .iter()
            .map(|number| normalize_phone(number))
            .filter(|number| !number.is_empty())
            .collect();
        self
    }
}

/// Where device contacts come from.
pub trait ContactSource: Send + Sync {
    fn load(&self) -> Result<Vec<DeviceContact>, ContactsError>;
}

/// Contacts exported to a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileContacts {
    path: PathBuf,
}

impl JsonFileContacts {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ContactSource for JsonFileContacts {
    fn load(&self) -> Result<Vec<DeviceContact>, ContactsError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| match err.kind() {
            io::ErrorKind::PermissionDenied => ContactsError::PermissionDenied,
            _ => ContactsError::Io(err),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Strips everything but digits.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub fn invite_message() -> String {
    format!("Hey! Join me on ThunderTalk to chat. Download the app here: {INVITE_LINK}")
}

/// Outcome of tapping a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactResolution {
    /// A profile (registered or guest) already owns the number.
    Existing(Uuid),
    /// Nobody owns the number yet: start a guest chat or send an invite.
    Unregistered { name: String, phone_number: String },
}

/// Reachable contacts, sorted by name, with the profiles that match them.
#[derive(Debug, Clone, Default)]
pub struct ContactDirectory {
    contacts: Vec<DeviceContact>,
    registered: Vec<Profile>,
}

impl ContactDirectory {
    pub fn new(raw: Vec<DeviceContact>) -> Self {
        let mut contacts: Vec<DeviceContact> = raw
            .into_iter()
            .map(DeviceContact::normalized)
            .filter(DeviceContact::is_reachable)
            .collect();
        contacts.sort_by_key(|c| c.name.to_lowercase());

        Self {
            contacts,
            registered: Vec::new(),
        }
    }

    pub fn load(source: &dyn ContactSource) -> Result<Self, ContactsError> {
        Ok(Self::new(source.load()?))
    }

    /// Every distinct normalized number, for the registration lookup.
    pub fn phone_numbers(&self) -> Vec<String> {
        let mut numbers: Vec<String> = self
            .contacts
            .iter()
            .flat_map(|c| c.phone_numbers.iter().cloned())
            .collect();
        numbers.sort();
        numbers.dedup();
        numbers
    }

    pub fn set_registered(&mut self, profiles: Vec<Profile>) {
        self.registered = profiles;
    }

    pub fn registered_profile(&self, contact: &DeviceContact) -> Option<&Profile> {
        self.registered.iter().find(|profile| {
            profile
                .phone_number
                .as_deref()
                .map(|number| contact.phone_numbers.iter().any(|n| n == number))
                .unwrap_or(false)
        })
    }

    pub fn is_registered(&self, contact: &DeviceContact) -> bool {
        self.registered_profile(contact).is_some()
    }

    pub fn contacts(&self) -> &[DeviceContact] {
        &self.contacts
    }

    pub fn get(&self, id: &str) -> Option<&DeviceContact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    /// Matches name or e-mail case-insensitively, or any number containing `query`.
    pub fn search(&self, query: &str) -> Vec<&DeviceContact> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.contacts.iter().collect();
        }
        self.contacts
            .iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c.phone_numbers.iter().any(|n| n.contains(&needle))
                    || c.email
                        .as_deref()
                        .map(|e| e.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

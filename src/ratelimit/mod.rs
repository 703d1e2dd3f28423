pub mod distributed;
pub mod in_memory;
pub mod quota;
pub mod redis_backend;
pub mod rest_backend;
pub mod service;

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LimiterResult;

/// Protected operation a quota applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Core,
    Guestbook,
    Contact,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Core, Category::Guestbook, Category::Contact];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Guestbook => "guestbook",
            Self::Contact => "contact",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Core => 0,
            Self::Guestbook => 1,
            Self::Contact => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" => Ok(Self::Core),
            "guestbook" => Ok(Self::Guestbook),
            "contact" => Ok(Self::Contact),
            _ => Err(format!("unknown rate limit category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Distributed,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distributed => f.write_str("distributed"),
            Self::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub admitted: bool,
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    pub fn admit() -> Self {
        Self {
            admitted: true,
            retry_after_secs: None,
        }
    }

    pub fn deny(retry_after_secs: Option<u64>) -> Self {
        Self {
            admitted: false,
            retry_after_secs,
        }
    }
}

/// Per-category counter. One instance is cached per category for the life of a service.
#[async_trait]
pub trait CounterAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn admit(&self, identifier: &str) -> LimiterResult<Decision>;
}

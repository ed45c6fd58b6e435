//! Strongly-typed domain values for the fabric
//!
//! This module defines validated newtypes to prevent primitive obsession
//! and keep wire-level constraints in one place.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier for an agent
///
/// Agent ids arrive from the wire as free-form strings; generated ids are
/// UUID v4 strings.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct AgentId(String);

impl AgentId {
    /// Creates a new random agent ID
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("uuid strings are non-empty")
    }
}

/// Name of a capability an agent advertises
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct CapabilityName(String);

/// Unique identifier for a message
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a new random message ID
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("uuid strings are non-empty")
    }
}

/// Unique identifier for a task
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new random task ID
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("uuid strings are non-empty")
    }
}

/// Identifier grouping related tasks and messages
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ContextId(String);

impl ContextId {
    /// Creates a new random context ID
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("uuid strings are non-empty")
    }
}

/// Unique identifier for a task artifact
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Creates a new random artifact ID
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("uuid strings are non-empty")
    }
}

/// Endpoint URL an agent is reachable at
#[nutype(
    validate(len_char_min = 1, len_char_max = 2048),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct EndpointUrl(String);

/// Agent load as a percentage
#[nutype(
    validate(less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0
)]
pub struct LoadPercent(u8);

impl LoadPercent {
    /// Gets the value as u8
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.into_inner()
    }

    /// Load as a fraction in `[0, 1]`
    #[must_use]
    pub fn as_fraction(&self) -> f64 {
        f64::from(self.into_inner()) / 100.0
    }
}

/// Computational cost of a capability, `0..=100`
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 100.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0.0
)]
pub struct CostScore(f64);

impl CostScore {
    /// Gets the value as f64
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }

    /// Cost as a fraction in `[0, 1]`
    #[must_use]
    pub fn as_fraction(&self) -> f64 {
        self.into_inner() / 100.0
    }
}

/// Reliability of a capability, `0.0..=1.0`
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1.0
)]
pub struct Reliability(f64);

impl Reliability {
    /// Gets the value as f64
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Capacity bound for message queues
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1000
)]
pub struct ChannelCapacity(usize);

impl ChannelCapacity {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum retry attempts for failed deliveries
#[nutype(
    validate(less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct MaxRetries(u8);

impl MaxRetries {
    /// Gets the value as u8
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.into_inner()
    }
}

/// Consecutive failures that trip a circuit breaker open
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct FailureThreshold(u32);

impl FailureThreshold {
    /// Gets the value as u32
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Consecutive half-open successes that close a circuit breaker
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 2
)]
pub struct SuccessThreshold(u32);

impl SuccessThreshold {
    /// Gets the value as u32
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

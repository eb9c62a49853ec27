//! Pure state-transition validation for rides, drivers and trips
//!
//! Stateless by design: callers lock the row, read the current state, then
//! call `validate` inside the same transaction. The store enforces the same
//! tables again via triggers, so a bypassed validation cannot corrupt data.

use crate::errors::DispatchError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Ride,
    Driver,
    Trip,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ride => "ride",
            Self::Driver => "driver",
            Self::Trip => "trip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideStatus {
    Requested,
    Matching,
    DriverAssigned,
    Completed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Offline,
    Available,
    OnTrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    Created,
    Started,
    Paused,
    Ended,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Matching => "MATCHING",
            Self::DriverAssigned => "DRIVER_ASSIGNED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Targets reachable from this state
    pub fn allowed(&self) -> &'static [&'static str] {
        match self {
            Self::Requested => &["MATCHING", "CANCELLED", "EXPIRED"],
            Self::Matching => &["DRIVER_ASSIGNED", "CANCELLED", "EXPIRED"],
            Self::DriverAssigned => &["COMPLETED", "CANCELLED"],
            Self::Completed | Self::Cancelled | Self::Expired => &[],
        }
    }
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Available => "AVAILABLE",
            Self::OnTrip => "ON_TRIP",
        }
    }

    /// Driver states cycle; none is terminal
    pub fn is_terminal(&self) -> bool {
        false
    }

    pub fn allowed(&self) -> &'static [&'static str] {
        match self {
            Self::Offline => &["AVAILABLE"],
            Self::Available => &["OFFLINE", "ON_TRIP"],
            Self::OnTrip => &["AVAILABLE", "OFFLINE"],
        }
    }
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Paused => "PAUSED",
            Self::Ended => "ENDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Cancelled)
    }

    pub fn allowed(&self) -> &'static [&'static str] {
        match self {
            Self::Created => &["STARTED", "CANCELLED"],
            Self::Started => &["PAUSED", "ENDED", "CANCELLED"],
            Self::Paused => &["STARTED", "ENDED", "CANCELLED"],
            Self::Ended | Self::Cancelled => &[],
        }
    }
}

macro_rules! impl_status_parse {
    ($ty:ty, $kind:expr, [$(($variant:expr, $text:expr)),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = DispatchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == $text {
                        return Ok($variant);
                    }
                )+
                Err(DispatchError::ValidationFailed(format!(
                    "unknown {} status: {}",
                    $kind, s
                )))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_status_parse!(
    RideStatus,
    "ride",
    [
        (RideStatus::Requested, "REQUESTED"),
        (RideStatus::Matching, "MATCHING"),
        (RideStatus::DriverAssigned, "DRIVER_ASSIGNED"),
        (RideStatus::Completed, "COMPLETED"),
        (RideStatus::Cancelled, "CANCELLED"),
        (RideStatus::Expired, "EXPIRED"),
    ]
);

impl_status_parse!(
    DriverStatus,
    "driver",
    [
        (DriverStatus::Offline, "OFFLINE"),
        (DriverStatus::Available, "AVAILABLE"),
        (DriverStatus::OnTrip, "ON_TRIP"),
    ]
);

impl_status_parse!(
    TripStatus,
    "trip",
    [
        (TripStatus::Created, "CREATED"),
        (TripStatus::Started, "STARTED"),
        (TripStatus::Paused, "PAUSED"),
        (TripStatus::Ended, "ENDED"),
        (TripStatus::Cancelled, "CANCELLED"),
    ]
);

fn transition_error(
    entity: &'static str,
    from: &str,
    to: &str,
    allowed: &'static [&'static str],
) -> DispatchError {
    DispatchError::InvalidTransition {
        entity,
        from: from.to_string(),
        to: to.to_string(),
        allowed: allowed.to_vec(),
    }
}

/// Validate a ride transition; `Ok(())` when the edge exists in the table
pub fn validate_ride(from: RideStatus, to: RideStatus) -> Result<(), DispatchError> {
    if from.allowed().contains(&to.as_str()) {
        Ok(())
    } else {
        Err(transition_error(
            EntityKind::Ride.as_str(),
            from.as_str(),
            to.as_str(),
            from.allowed(),
        ))
    }
}

pub fn validate_driver(from: DriverStatus, to: DriverStatus) -> Result<(), DispatchError> {
    if from.allowed().contains(&to.as_str()) {
        Ok(())
    } else {
        Err(transition_error(
            EntityKind::Driver.as_str(),
            from.as_str(),
            to.as_str(),
            from.allowed(),
        ))
    }
}

pub fn validate_trip(from: TripStatus, to: TripStatus) -> Result<(), DispatchError> {
    if from.allowed().contains(&to.as_str()) {
        Ok(())
    } else {
        Err(transition_error(
            EntityKind::Trip.as_str(),
            from.as_str(),
            to.as_str(),
            from.allowed(),
        ))
    }
}

/// `is_terminal` over stringly state, for callers holding raw rows
pub fn is_terminal(kind: EntityKind, state: &str) -> Result<bool, DispatchError> {
    match kind {
        EntityKind::Ride => Ok(RideStatus::from_str(state)?.is_terminal()),
        EntityKind::Driver => Ok(DriverStatus::from_str(state)?.is_terminal()),
        EntityKind::Trip => Ok(TripStatus::from_str(state)?.is_terminal()),
    }
}

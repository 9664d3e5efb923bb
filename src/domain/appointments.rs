use crate::time_utils::local_datetime;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_DURATION_MINUTES: i64 = 15;
pub const MAX_DURATION_MINUTES: i64 = 120;
const OPENING_HOUR: u32 = 8;
const CLOSING_HOUR: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "appointment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentAction {
    Confirm,
    Cancel,
    Complete,
}

impl AppointmentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentAction::Confirm => "confirm",
            AppointmentAction::Cancel => "cancel",
            AppointmentAction::Complete => "complete",
        }
    }
}

/// How the caller relates to the appointment. `Staff` holds `appointment:manage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Client,
    Consultant,
    Staff,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppointmentError {
    #[error("duration must be between 15 and 120 minutes, got {0}")]
    Duration(i64),
    #[error("appointment must start in the future")]
    InPast,
    #[error("appointment must fall within the consultant's working hours (08:00-20:00)")]
    OutsideHours,
    #[error("cannot {0} an appointment that is {1}")]
    Transition(&'static str, &'static str),
    #[error("not allowed to {0} this appointment")]
    NotAllowed(&'static str),
}

pub fn transition(
    status: AppointmentStatus,
    action: AppointmentAction,
    party: Party,
) -> Result<AppointmentStatus, AppointmentError> {
    use AppointmentAction::*;
    use AppointmentStatus::*;

    if matches!(action, Confirm | Complete) && party == Party::Client {
        return Err(AppointmentError::NotAllowed(action.as_str()));
    }

    match (status, action) {
        (Pending, Confirm) => Ok(Confirmed),
        (Confirmed, Complete) => Ok(Completed),
        (Pending | Confirmed, Cancel) => Ok(Cancelled),
        (status, action) => Err(AppointmentError::Transition(action.as_str(), status.as_str())),
    }
}

/// Checks a requested slot and returns its end time.
pub fn validate_slot(
    starts_at: DateTime<Utc>,
    duration_minutes: i64,
    now: DateTime<Utc>,
    consultant_tz: &str,
) -> Result<DateTime<Utc>, AppointmentError> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        return Err(AppointmentError::Duration(duration_minutes));
    }
    if starts_at <= now {
        return Err(AppointmentError::InPast);
    }
    let ends_at = starts_at + Duration::minutes(duration_minutes);

    let local_start = local_datetime(consultant_tz, starts_at);
    let local_end = local_datetime(consultant_tz, ends_at);
    let opening = NaiveTime::from_hms_opt(OPENING_HOUR, 0, 0).ok_or(AppointmentError::OutsideHours)?;
    let closing = NaiveTime::from_hms_opt(CLOSING_HOUR, 0, 0).ok_or(AppointmentError::OutsideHours)?;

    if local_start.date() != local_end.date()
        || local_start.time() < opening
        || local_end.time() > closing
    {
        return Err(AppointmentError::OutsideHours);
    }

    Ok(ends_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn lifecycle_transitions() {
        use AppointmentAction::*;
        use AppointmentStatus::*;

        assert_eq!(transition(Pending, Confirm, Party::Consultant), Ok(Confirmed));
        assert_eq!(transition(Confirmed, Complete, Party::Consultant), Ok(Completed));
        assert_eq!(transition(Pending, Cancel, Party::Client), Ok(Cancelled));
        assert_eq!(transition(Confirmed, Cancel, Party::Staff), Ok(Cancelled));

        assert!(matches!(
            transition(Pending, Complete, Party::Consultant),
            Err(AppointmentError::Transition(_, _))
        ));
        assert!(matches!(
            transition(Cancelled, Cancel, Party::Client),
            Err(AppointmentError::Transition(_, _))
        ));
        assert!(matches!(
            transition(Completed, Confirm, Party::Staff),
            Err(AppointmentError::Transition(_, _))
        ));
    }

    #[test]
    fn clients_cannot_confirm_or_complete() {
        use AppointmentAction::*;
        use AppointmentStatus::*;
        assert_eq!(
            transition(Pending, Confirm, Party::Client),
            Err(AppointmentError::NotAllowed("confirm"))
        );
        assert_eq!(
            transition(Confirmed, Complete, Party::Client),
            Err(AppointmentError::NotAllowed("complete"))
        );
    }

    #[test]
    fn slot_duration_bounds() {
        assert!(validate_slot(at(9, 0), 15, now(), "UTC").is_ok());
        assert!(validate_slot(at(9, 0), 120, now(), "UTC").is_ok());
        assert_eq!(
            validate_slot(at(9, 0), 10, now(), "UTC"),
            Err(AppointmentError::Duration(10))
        );
        assert_eq!(
            validate_slot(at(9, 0), 121, now(), "UTC"),
            Err(AppointmentError::Duration(121))
        );
    }

    #[test]
    fn slot_must_be_in_future() {
        assert_eq!(
            validate_slot(now(), 30, now(), "UTC"),
            Err(AppointmentError::InPast)
        );
    }

    #[test]
    fn slot_respects_consultant_hours() {
        assert_eq!(validate_slot(at(8, 0), 60, now(), "UTC"), Ok(at(9, 0)));
        assert_eq!(validate_slot(at(19, 0), 60, now(), "UTC"), Ok(at(20, 0)));
        assert_eq!(
            validate_slot(at(7, 45), 30, now(), "UTC"),
            Err(AppointmentError::OutsideHours)
        );
        assert_eq!(
            validate_slot(at(19, 30), 60, now(), "UTC"),
            Err(AppointmentError::OutsideHours)
        );
        // 06:00 UTC is 09:00 for a consultant at UTC+3.
        assert!(validate_slot(at(6, 0), 60, now(), "UTC+03:00").is_ok());
        assert_eq!(
            validate_slot(at(18, 0), 60, now(), "UTC+03:00"),
            Err(AppointmentError::OutsideHours)
        );
    }
}

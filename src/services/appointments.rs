//! Booking, status changes and reminders for consultations.
use crate::crypto::Crypto;
use crate::db;
use crate::db::appointments::DbAppointment;
use crate::domain::appointments::{transition, validate_slot, AppointmentAction, AppointmentStatus, Party};
use crate::domain::permissions::{Principal, Requirement, APPOINTMENT_MANAGE, ROLE_CONSULTANT};
use crate::error::{AppError, AppResult};
use crate::time_utils::format_local_time;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub consultant_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    pub id: i64,
    pub client_id: Uuid,
    pub client_name: String,
    pub consultant_id: Uuid,
    pub consultant_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl AppointmentView {
    pub fn from_row(row: DbAppointment, crypto: &Crypto) -> Self {
        Self {
            notes: crypto.open_lossy(row.enc_notes.as_deref()),
            id: row.id,
            client_id: row.client_id,
            client_name: row.client_name,
            consultant_id: row.consultant_id,
            consultant_name: row.consultant_name,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            status: row.status,
        }
    }
}

/// Relationship of the caller to the appointment; `None` means no access.
pub fn party_of(principal: &Principal, appointment: &DbAppointment) -> Option<Party> {
    if appointment.consultant_id == principal.user_id {
        Some(Party::Consultant)
    } else if appointment.client_id == principal.user_id {
        Some(Party::Client)
    } else if principal.can(&Requirement::permission(APPOINTMENT_MANAGE)) {
        Some(Party::Staff)
    } else {
        None
    }
}

pub async fn book(
    pool: &PgPool,
    crypto: &Crypto,
    client: &Principal,
    request: &BookingRequest,
) -> AppResult<i64> {
    if request.consultant_id == client.user_id {
        return Err(AppError::validation("cannot book an appointment with yourself"));
    }

    let consultant = db::find_user_by_id(pool, request.consultant_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::not_found(format!("consultant {}", request.consultant_id)))?;
    let is_consultant = match consultant.role_id {
        Some(role_id) => db::find_role_by_id(pool, role_id)
            .await?
            .is_some_and(|r| r.name == ROLE_CONSULTANT),
        None => false,
    };
    if !is_consultant {
        return Err(AppError::validation(format!(
            "user {} is not a consultant",
            consultant.id
        )));
    }

    let ends_at = validate_slot(
        request.starts_at,
        request.duration_minutes,
        Utc::now(),
        &consultant.timezone,
    )?;
    let enc_notes = crypto
        .seal_opt(request.notes.as_deref())
        .map_err(|e| AppError::Internal(e.into()))?;

    let mut tx = pool.begin().await?;
    db::appointments::lock_consultant(&mut tx, consultant.id).await?;
    if db::appointments::has_overlap(&mut tx, consultant.id, request.starts_at, ends_at).await? {
        return Err(AppError::Conflict(
            "consultant already has an appointment in that slot".to_string(),
        ));
    }
    let id = db::appointments::insert_appointment(
        &mut tx,
        client.user_id,
        consultant.id,
        request.starts_at,
        ends_at,
        enc_notes.as_deref(),
    )
    .await?;
    db::notifications::insert_notification(
        &mut *tx,
        consultant.id,
        "New appointment request",
        &format!(
            "{} requested a session on {}.",
            client.full_name,
            format_local_time(&consultant.timezone, request.starts_at)
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        "Appointment {} booked by {} with consultant {}",
        id,
        client.user_id,
        consultant.id
    );
    Ok(id)
}

/// Applies a status change and notifies whoever did not make it.
pub async fn apply_action(
    pool: &PgPool,
    principal: &Principal,
    appointment_id: i64,
    action: AppointmentAction,
) -> AppResult<AppointmentStatus> {
    let appointment = db::appointments::find_appointment(pool, appointment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("appointment {appointment_id}")))?;
    let party = party_of(principal, &appointment)
        .ok_or_else(|| AppError::not_found(format!("appointment {appointment_id}")))?;

    // Staff may cancel on anyone's behalf but the consultant owns the session itself.
    if party == Party::Staff && action != AppointmentAction::Cancel {
        return Err(AppError::Forbidden(format!(
            "only the consultant may {} this appointment",
            action.as_str()
        )));
    }

    let next = transition(appointment.status, action, party)?;
    if !db::appointments::update_status(pool, appointment.id, appointment.status, next).await? {
        return Err(AppError::Conflict(
            "appointment was changed by another request".to_string(),
        ));
    }

    let when = |tz: &str| format_local_time(tz, appointment.starts_at);
    let mut recipients = Vec::with_capacity(2);
    if party != Party::Client {
        recipients.push((appointment.client_id, when(appointment.client_timezone.as_str())));
    }
    if party != Party::Consultant {
        recipients.push((appointment.consultant_id, when(appointment.consultant_timezone.as_str())));
    }
    for (user_id, local_time) in recipients {
        db::notifications::insert_notification(
            pool,
            user_id,
            &format!("Appointment {}", next.as_str()),
            &format!("Your session on {} is now {}.", local_time, next.as_str()),
        )
        .await?;
    }

    Ok(next)
}

/// Notifies both parties of sessions starting within the next hour.
pub async fn send_reminders(pool: &PgPool) -> anyhow::Result<usize> {
    let now = Utc::now();
    let due = db::appointments::claim_due_reminders(pool, now, now + Duration::hours(1)).await?;

    for appointment in &due {
        let pairs = [
            (appointment.client_id, &appointment.client_timezone, &appointment.consultant_name),
            (appointment.consultant_id, &appointment.consultant_timezone, &appointment.client_name),
        ];
        for (user_id, tz, other) in pairs {
            db::notifications::insert_notification(
                pool,
                user_id,
                "Upcoming appointment",
                &format!(
                    "Reminder: your session with {} starts at {}.",
                    other,
                    format_local_time(tz, appointment.starts_at)
                ),
            )
            .await?;
        }
    }
    Ok(due.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permissions::RoleGrant;
    use std::collections::HashSet;

    fn principal(id: Uuid, permissions: &[&str]) -> Principal {
        Principal {
            user_id: id,
            email: "p@example.com".to_string(),
            full_name: "P".to_string(),
            role: Some(RoleGrant {
                id: 1,
                name: "Custom".to_string(),
                permissions: permissions.iter().map(|p| p.to_string()).collect::<HashSet<_>>(),
            }),
        }
    }

    fn appointment(client: Uuid, consultant: Uuid) -> DbAppointment {
        let now = Utc::now();
        DbAppointment {
            id: 1,
            client_id: client,
            client_name: "Client".to_string(),
            client_timezone: "UTC".to_string(),
            consultant_id: consultant,
            consultant_name: "Consultant".to_string(),
            consultant_timezone: "Europe/Kyiv".to_string(),
            starts_at: now,
            ends_at: now + Duration::minutes(30),
            status: AppointmentStatus::Pending,
            enc_notes: None,
            created_at: now,
        }
    }

    #[test]
    fn party_resolution() {
        let client = Uuid::new_v4();
        let consultant = Uuid::new_v4();
        let appt = appointment(client, consultant);

        assert_eq!(party_of(&principal(client, &[]), &appt), Some(Party::Client));
        assert_eq!(party_of(&principal(consultant, &[]), &appt), Some(Party::Consultant));
        assert_eq!(
            party_of(&principal(Uuid::new_v4(), &[APPOINTMENT_MANAGE]), &appt),
            Some(Party::Staff)
        );
        assert_eq!(party_of(&principal(Uuid::new_v4(), &[]), &appt), None);
    }

    #[test]
    fn view_decrypts_notes() {
        let crypto = Crypto::new(&[7u8; 32]).unwrap();
        let mut appt = appointment(Uuid::new_v4(), Uuid::new_v4());
        appt.enc_notes = Some(crypto.seal("first session").unwrap());

        let view = AppointmentView::from_row(appt, &crypto);
        assert_eq!(view.notes.as_deref(), Some("first session"));
    }
}

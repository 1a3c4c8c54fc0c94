use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};

use reserva_core::activity::{ActivityAction, ActivityLogEntry};
use reserva_core::conflict::BookedSlot;
use reserva_core::domain::reservation::{
    ApprovalStep, ApprovalStepId, NewReservation, Reservation, ReservationDetail, ReservationId,
    ReservationStatus, StepStatus,
};
use reserva_core::domain::resource::{Resource, ResourceId};
use reserva_core::domain::slot::{TimeSlot, DATE_FORMAT, TIME_FORMAT};
use reserva_core::domain::user::{Actor, UserId};
use reserva_core::domain::workflow::WorkflowStep;
use reserva_core::store::{ReservationStore, StoreError, StoreTransaction};
use reserva_core::views::{
    ApprovalDecision, CalendarEntry, CalendarQuery, PendingApproval, RequesterReservation,
};

use super::RepositoryError;
use crate::DbPool;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const RESERVATION_COLUMNS: &str = "r.id, r.resource_id, r.requester_id, r.purpose, r.date_from,
     r.date_to, r.status, r.created_at";
const STEP_COLUMNS: &str =
    "s.id, s.reservation_id, s.step_order, s.approver_id, s.status, s.acted_at, s.comment";

/// SQLite-backed store. Transactions open with `BEGIN IMMEDIATE`, so the write lock is taken
/// before the first read and concurrent decisions queue behind each other.
#[derive(Clone)]
pub struct SqlReservationStore {
    pool: DbPool,
}

impl SqlReservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub struct SqlStoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_date(value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("date `{value}`: {e}")))
}

fn parse_time(value: &str) -> Result<NaiveTime, RepositoryError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("time `{value}`: {e}")))
}

fn parse_datetime(value: &str) -> Result<NaiveDateTime, RepositoryError> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{value}`: {e}")))
}

fn format_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

fn format_time(value: NaiveTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

fn format_datetime(value: NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

fn step_order(value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Decode(format!("step_order {value}")))
}

fn row_to_resource(row: &SqliteRow) -> Result<Resource, RepositoryError> {
    Ok(Resource {
        id: ResourceId(column(row, "id")?),
        name: column(row, "name")?,
        category: column(row, "category")?,
    })
}

fn row_to_reservation(row: &SqliteRow) -> Result<Reservation, RepositoryError> {
    let status: String = column(row, "status")?;
    let date_from: String = column(row, "date_from")?;
    let date_to: String = column(row, "date_to")?;
    let created_at: String = column(row, "created_at")?;

    Ok(Reservation {
        id: ReservationId(column(row, "id")?),
        resource_id: ResourceId(column(row, "resource_id")?),
        requester_id: UserId(column(row, "requester_id")?),
        purpose: column(row, "purpose")?,
        date_from: parse_date(&date_from)?,
        date_to: parse_date(&date_to)?,
        status: ReservationStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("reservation status `{status}`")))?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let status: String = column(row, "status")?;
    let acted_at: Option<String> = column(row, "acted_at")?;

    Ok(ApprovalStep {
        id: ApprovalStepId(column(row, "id")?),
        reservation_id: ReservationId(column(row, "reservation_id")?),
        step_order: step_order(column(row, "step_order")?)?,
        approver_id: UserId(column(row, "approver_id")?),
        status: StepStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("step status `{status}`")))?,
        acted_at: acted_at.as_deref().map(parse_datetime).transpose()?,
        comment: column(row, "comment")?,
    })
}

fn row_to_slot(row: &SqliteRow) -> Result<TimeSlot, RepositoryError> {
    let date: String = column(row, "slot_date")?;
    let start: String = column(row, "start_time")?;
    let end: String = column(row, "end_time")?;
    Ok(TimeSlot::new(parse_date(&date)?, parse_time(&start)?, parse_time(&end)?))
}

fn row_to_booked(row: &SqliteRow) -> Result<BookedSlot, RepositoryError> {
    let status: String = column(row, "status")?;
    Ok(BookedSlot {
        reservation_id: ReservationId(column(row, "reservation_id")?),
        purpose: column(row, "purpose")?,
        requester_id: UserId(column(row, "requester_id")?),
        status: ReservationStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("reservation status `{status}`")))?,
        slot: row_to_slot(row)?,
    })
}

fn row_to_activity(row: &SqliteRow) -> Result<ActivityLogEntry, RepositoryError> {
    let actor_kind: String = column(row, "actor_kind")?;
    let actor_id: String = column(row, "actor_id")?;
    let action: String = column(row, "action")?;
    let step: Option<i64> = column(row, "step_order")?;
    let metadata_json: Option<String> = column(row, "metadata_json")?;
    let occurred_at: String = column(row, "occurred_at")?;

    let metadata = match metadata_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| RepositoryError::Decode(format!("activity metadata: {e}")))?,
        None => Default::default(),
    };

    Ok(ActivityLogEntry {
        reservation_id: ReservationId(column(row, "reservation_id")?),
        actor: Actor::from_parts(&actor_kind, &actor_id)
            .ok_or_else(|| RepositoryError::Decode(format!("actor kind `{actor_kind}`")))?,
        action: ActivityAction::parse(&action)
            .ok_or_else(|| RepositoryError::Decode(format!("activity action `{action}`")))?,
        description: column(row, "description")?,
        old_status: column(row, "old_status")?,
        new_status: column(row, "new_status")?,
        step_order: step.map(step_order).transpose()?,
        comment: column(row, "comment")?,
        metadata,
        occurred_at: parse_datetime(&occurred_at)?,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

async fn find_resource(
    conn: &mut SqliteConnection,
    id: ResourceId,
) -> Result<Option<Resource>, RepositoryError> {
    let row = sqlx::query("SELECT id, name, category FROM resource WHERE id = ?")
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_resource).transpose()
}

async fn load_workflow(
    conn: &mut SqliteConnection,
    resource_id: ResourceId,
) -> Result<Vec<WorkflowStep>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT approver_id, step_order FROM workflow_step
         WHERE resource_id = ?
         ORDER BY step_order ASC, id ASC",
    )
    .bind(resource_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(WorkflowStep {
                approver_id: UserId(column(row, "approver_id")?),
                step_order: step_order(column(row, "step_order")?)?,
            })
        })
        .collect()
}

async fn load_booked_slots(
    conn: &mut SqliteConnection,
    resource_id: ResourceId,
    dates: &[NaiveDate],
) -> Result<Vec<BookedSlot>, RepositoryError> {
    if dates.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT d.reservation_id, d.slot_date, d.start_time, d.end_time,
                r.purpose, r.requester_id, r.status
         FROM daily_slot d
         JOIN reservation r ON r.id = d.reservation_id
         WHERE r.resource_id = ?
           AND r.status IN ('pending', 'approved')
           AND d.slot_date IN ({})
         ORDER BY d.slot_date ASC, d.start_time ASC, d.reservation_id ASC",
        placeholders(dates.len())
    );
    let mut query = sqlx::query(&sql).bind(resource_id.0);
    for date in dates {
        query = query.bind(format_date(*date));
    }

    let rows = query.fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_booked).collect()
}

async fn find_reservation(
    conn: &mut SqliteConnection,
    id: ReservationId,
) -> Result<Option<Reservation>, RepositoryError> {
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservation r WHERE r.id = ?");
    let row = sqlx::query(&sql).bind(id.0).fetch_optional(&mut *conn).await?;
    row.as_ref().map(row_to_reservation).transpose()
}

async fn slots_for(
    conn: &mut SqliteConnection,
    reservation_id: ReservationId,
) -> Result<Vec<TimeSlot>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT slot_date, start_time, end_time FROM daily_slot
         WHERE reservation_id = ?
         ORDER BY slot_date ASC, start_time ASC",
    )
    .bind(reservation_id.0)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(row_to_slot).collect()
}

async fn steps_for(
    conn: &mut SqliteConnection,
    reservation_id: ReservationId,
) -> Result<Vec<ApprovalStep>, RepositoryError> {
    let sql = format!(
        "SELECT {STEP_COLUMNS} FROM approval_step s
         WHERE s.reservation_id = ?
         ORDER BY s.step_order ASC, s.id ASC"
    );
    let rows = sqlx::query(&sql).bind(reservation_id.0).fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_step).collect()
}

async fn resource_name(
    conn: &mut SqliteConnection,
    resource_id: ResourceId,
) -> Result<String, RepositoryError> {
    Ok(find_resource(conn, resource_id).await?.map(|resource| resource.name).unwrap_or_default())
}

#[async_trait]
impl ReservationStore for SqlReservationStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(RepositoryError::from)?;
        Ok(Box::new(SqlStoreTransaction { tx }))
    }

    async fn expired_pending(&self, now: NaiveDateTime) -> Result<Vec<ReservationId>, StoreError> {
        let rows = sqlx::query(
            "SELECT r.id
             FROM reservation r
             JOIN daily_slot d ON d.reservation_id = r.id
             WHERE r.status = 'pending'
             GROUP BY r.id
             HAVING MIN(d.slot_date || ' ' || d.start_time) < ?
             ORDER BY r.id ASC",
        )
        .bind(format_datetime(now))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter()
            .map(|row| column(row, "id").map(ReservationId).map_err(StoreError::from))
            .collect()
    }

    async fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(find_resource(&mut conn, id).await?)
    }

    async fn workflow(&self, resource_id: ResourceId) -> Result<Vec<WorkflowStep>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(load_workflow(&mut conn, resource_id).await?)
    }

    async fn booked_slots(
        &self,
        resource_id: ResourceId,
        dates: &[NaiveDate],
    ) -> Result<Vec<BookedSlot>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(load_booked_slots(&mut conn, resource_id, dates).await?)
    }

    async fn reservation_detail(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationDetail>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let Some(reservation) = find_reservation(&mut conn, id).await? else {
            return Ok(None);
        };
        let slots = slots_for(&mut conn, id).await?;
        let steps = steps_for(&mut conn, id).await?;
        Ok(Some(ReservationDetail { reservation, slots, steps }))
    }

    async fn calendar(&self, query: &CalendarQuery) -> Result<Vec<CalendarEntry>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS}, res.name AS resource_name
             FROM reservation r
             JOIN resource res ON res.id = r.resource_id
             WHERE r.status IN ('pending', 'approved')
               AND r.date_from <= ?
               AND r.date_to >= ?
               AND (? IS NULL OR r.resource_id = ?)
             ORDER BY r.date_from ASC, r.id ASC"
        );
        let resource_filter = query.resource_id.map(|id| id.0);
        let rows = sqlx::query(&sql)
            .bind(format_date(query.to))
            .bind(format_date(query.from))
            .bind(resource_filter)
            .bind(resource_filter)
            .fetch_all(&mut *conn)
            .await
            .map_err(RepositoryError::from)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let reservation = row_to_reservation(row)?;
            let slots = slots_for(&mut conn, reservation.id).await?;
            entries.push(CalendarEntry {
                resource_name: column(row, "resource_name")?,
                reservation,
                slots,
            });
        }
        Ok(entries)
    }

    async fn reservations_for_requester(
        &self,
        requester_id: &UserId,
    ) -> Result<Vec<RequesterReservation>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS}, res.name AS resource_name
             FROM reservation r
             JOIN resource res ON res.id = r.resource_id
             WHERE r.requester_id = ?
             ORDER BY r.created_at DESC, r.id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(requester_id.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(RepositoryError::from)?;

        let mut reservations = Vec::with_capacity(rows.len());
        for row in &rows {
            let reservation = row_to_reservation(row)?;
            reservations.push(RequesterReservation {
                resource_name: column(row, "resource_name")?,
                slots: slots_for(&mut conn, reservation.id).await?,
                steps: steps_for(&mut conn, reservation.id).await?,
                reservation,
            });
        }
        Ok(reservations)
    }

    async fn pending_for_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<PendingApproval>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let sql = format!(
            "SELECT {STEP_COLUMNS}
             FROM approval_step s
             JOIN reservation r ON r.id = s.reservation_id
             WHERE s.approver_id = ? AND s.status = 'pending' AND r.status = 'pending'
             ORDER BY r.created_at DESC, r.id DESC, s.step_order ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(approver_id.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(RepositoryError::from)?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in &rows {
            let step = row_to_step(row)?;
            let Some(reservation) = find_reservation(&mut conn, step.reservation_id).await? else {
                continue;
            };
            let steps = steps_for(&mut conn, reservation.id).await?;
            pending.push(PendingApproval {
                resource_name: resource_name(&mut conn, reservation.resource_id).await?,
                slots: slots_for(&mut conn, reservation.id).await?,
                total_steps: u32::try_from(steps.len()).unwrap_or(u32::MAX),
                step,
                reservation,
            });
        }
        Ok(pending)
    }

    async fn decisions_by_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalDecision>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let sql = format!(
            "SELECT {STEP_COLUMNS}
             FROM approval_step s
             WHERE s.approver_id = ? AND s.status IN ('approved', 'rejected')
             ORDER BY s.acted_at DESC, s.id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(approver_id.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(RepositoryError::from)?;

        let mut decisions = Vec::with_capacity(rows.len());
        for row in &rows {
            let step = row_to_step(row)?;
            let Some(reservation) = find_reservation(&mut conn, step.reservation_id).await? else {
                continue;
            };
            decisions.push(ApprovalDecision {
                resource_name: resource_name(&mut conn, reservation.resource_id).await?,
                step,
                reservation,
            });
        }
        Ok(decisions)
    }

    async fn activity_for(&self, id: ReservationId) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT reservation_id, actor_kind, actor_id, action, description, old_status,
                    new_status, step_order, comment, metadata_json, occurred_at
             FROM activity_log
             WHERE reservation_id = ?
             ORDER BY id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_activity).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl StoreTransaction for SqlStoreTransaction {
    async fn find_resource(&mut self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(find_resource(&mut self.tx, id).await?)
    }

    async fn insert_resource(
        &mut self,
        name: &str,
        category: &str,
    ) -> Result<Resource, StoreError> {
        let result = sqlx::query("INSERT INTO resource (name, category) VALUES (?, ?)")
            .bind(name)
            .bind(category)
            .execute(&mut *self.tx)
            .await
            .map_err(RepositoryError::from)?;

        Ok(Resource {
            id: ResourceId(result.last_insert_rowid()),
            name: name.to_owned(),
            category: category.to_owned(),
        })
    }

    async fn workflow(&mut self, resource_id: ResourceId) -> Result<Vec<WorkflowStep>, StoreError> {
        Ok(load_workflow(&mut self.tx, resource_id).await?)
    }

    async fn replace_workflow(
        &mut self,
        resource_id: ResourceId,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM workflow_step WHERE resource_id = ?")
            .bind(resource_id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(RepositoryError::from)?;

        for step in steps {
            sqlx::query(
                "INSERT INTO workflow_step (resource_id, approver_id, step_order) VALUES (?, ?, ?)",
            )
            .bind(resource_id.0)
            .bind(step.approver_id.as_str())
            .bind(i64::from(step.step_order))
            .execute(&mut *self.tx)
            .await
            .map_err(RepositoryError::from)?;
        }
        Ok(())
    }

    async fn booked_slots(
        &mut self,
        resource_id: ResourceId,
        dates: &[NaiveDate],
    ) -> Result<Vec<BookedSlot>, StoreError> {
        Ok(load_booked_slots(&mut self.tx, resource_id, dates).await?)
    }

    async fn insert_reservation(
        &mut self,
        reservation: &NewReservation,
    ) -> Result<Reservation, StoreError> {
        let status = ReservationStatus::Pending;
        let result = sqlx::query(
            "INSERT INTO reservation (resource_id, requester_id, purpose, date_from, date_to,
                                      status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(reservation.resource_id.0)
        .bind(reservation.requester_id.as_str())
        .bind(&reservation.purpose)
        .bind(format_date(reservation.date_from))
        .bind(format_date(reservation.date_to))
        .bind(status.as_str())
        .bind(format_datetime(reservation.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(RepositoryError::from)?;

        Ok(Reservation {
            id: ReservationId(result.last_insert_rowid()),
            resource_id: reservation.resource_id,
            requester_id: reservation.requester_id.clone(),
            purpose: reservation.purpose.clone(),
            date_from: reservation.date_from,
            date_to: reservation.date_to,
            status,
            created_at: reservation.created_at,
        })
    }

    async fn insert_slots(
        &mut self,
        reservation_id: ReservationId,
        slots: &[TimeSlot],
    ) -> Result<(), StoreError> {
        for slot in slots {
            sqlx::query(
                "INSERT INTO daily_slot (reservation_id, slot_date, start_time, end_time)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(reservation_id.0)
            .bind(format_date(slot.date))
            .bind(format_time(slot.start_time))
            .bind(format_time(slot.end_time))
            .execute(&mut *self.tx)
            .await
            .map_err(RepositoryError::from)?;
        }
        Ok(())
    }

    async fn insert_steps(
        &mut self,
        reservation_id: ReservationId,
        steps: &[WorkflowStep],
    ) -> Result<Vec<ApprovalStep>, StoreError> {
        let mut created = Vec::with_capacity(steps.len());
        for step in steps {
            let result = sqlx::query(
                "INSERT INTO approval_step (reservation_id, step_order, approver_id, status)
                 VALUES (?, ?, ?, 'pending')",
            )
            .bind(reservation_id.0)
            .bind(i64::from(step.step_order))
            .bind(step.approver_id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(RepositoryError::from)?;

            created.push(ApprovalStep {
                id: ApprovalStepId(result.last_insert_rowid()),
                reservation_id,
                step_order: step.step_order,
                approver_id: step.approver_id.clone(),
                status: StepStatus::Pending,
                acted_at: None,
                comment: None,
            });
        }
        Ok(created)
    }

    async fn find_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(find_reservation(&mut self.tx, id).await?)
    }

    async fn find_step(&mut self, id: ApprovalStepId) -> Result<Option<ApprovalStep>, StoreError> {
        let sql = format!("SELECT {STEP_COLUMNS} FROM approval_step s WHERE s.id = ?");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(row_to_step).transpose()?)
    }

    async fn slots_for(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        Ok(slots_for(&mut self.tx, reservation_id).await?)
    }

    async fn steps_for(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<ApprovalStep>, StoreError> {
        Ok(steps_for(&mut self.tx, reservation_id).await?)
    }

    async fn decide_step(
        &mut self,
        id: ApprovalStepId,
        approver_id: &UserId,
        status: StepStatus,
        acted_at: NaiveDateTime,
        comment: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE approval_step
             SET status = ?, acted_at = ?, comment = ?
             WHERE id = ? AND approver_id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(format_datetime(acted_at))
        .bind(comment)
        .bind(id.0)
        .bind(approver_id.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_reservation_status(
        &mut self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE reservation SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id.0)
            .bind(from.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_pending_steps(
        &mut self,
        reservation_id: ReservationId,
        acted_at: NaiveDateTime,
        comment: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE approval_step
             SET status = 'cancelled', acted_at = ?, comment = ?
             WHERE reservation_id = ? AND status = 'pending'",
        )
        .bind(format_datetime(acted_at))
        .bind(comment)
        .bind(reservation_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected())
    }

    async fn append_activity(&mut self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO activity_log (reservation_id, actor_kind, actor_id, action, description,
                                       old_status, new_status, step_order, comment,
                                       metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.reservation_id.0)
        .bind(entry.actor.kind())
        .bind(entry.actor.id())
        .bind(entry.action.as_str())
        .bind(&entry.description)
        .bind(&entry.old_status)
        .bind(&entry.new_status)
        .bind(entry.step_order.map(i64::from))
        .bind(&entry.comment)
        .bind(entry.metadata_json())
        .bind(format_datetime(entry.occurred_at))
        .execute(&mut *self.tx)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    use reserva_core::activity::{ActivityAction, ActivityLogEntry};
    use reserva_core::domain::reservation::{NewReservation, ReservationStatus, StepStatus};
    use reserva_core::domain::slot::TimeSlot;
    use reserva_core::domain::user::{Actor, UserId};
    use reserva_core::domain::workflow::WorkflowStep;
    use reserva_core::store::ReservationStore;

    use super::SqlReservationStore;
    use crate::{connect_with_settings, migrations};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).expect("date")
    }

    fn at(d: u32, h: u32) -> NaiveDateTime {
        day(d).and_time(NaiveTime::from_hms_opt(h, 0, 0).expect("time"))
    }

    fn slot(d: u32, start: u32, end: u32) -> TimeSlot {
        TimeSlot::new(
            day(d),
            NaiveTime::from_hms_opt(start, 0, 0).expect("start"),
            NaiveTime::from_hms_opt(end, 0, 0).expect("end"),
        )
    }

    async fn setup_store() -> SqlReservationStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlReservationStore::new(pool)
    }

    #[tokio::test]
    async fn reservation_rows_round_trip_through_transaction() {
        let store = setup_store().await;
        let mut tx = store.begin().await.expect("begin");
        let gym = tx.insert_resource("Gym", "venue").await.expect("resource");
        tx.replace_workflow(gym.id, &[WorkflowStep::new("a-1", 1), WorkflowStep::new("a-2", 2)])
            .await
            .expect("workflow");
        let reservation = tx
            .insert_reservation(&NewReservation {
                resource_id: gym.id,
                requester_id: UserId::new("u-1"),
                purpose: "Practice".to_owned(),
                date_from: day(10),
                date_to: day(11),
                created_at: at(1, 8),
            })
            .await
            .expect("reservation");
        tx.insert_slots(reservation.id, &[slot(11, 9, 10), slot(10, 14, 16)])
            .await
            .expect("slots");
        let workflow = tx.workflow(gym.id).await.expect("load workflow");
        let steps = tx.insert_steps(reservation.id, &workflow).await.expect("steps");
        tx.commit().await.expect("commit");

        let detail = store.reservation_detail(reservation.id).await.expect("detail").expect("row");
        assert_eq!(detail.reservation, reservation);
        assert_eq!(detail.slots, vec![slot(10, 14, 16), slot(11, 9, 10)]);
        assert_eq!(detail.steps, steps);
        assert!(detail.steps.iter().all(|step| step.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = setup_store().await;
        {
            let mut tx = store.begin().await.expect("begin");
            tx.insert_resource("Hall", "venue").await.expect("resource");
        }

        let mut tx = store.begin().await.expect("begin again");
        let found = tx.find_resource(reserva_core::ResourceId(1)).await.expect("lookup");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn conditional_updates_match_only_once() {
        let store = setup_store().await;
        let mut tx = store.begin().await.expect("begin");
        let gym = tx.insert_resource("Gym", "venue").await.expect("resource");
        let reservation = tx
            .insert_reservation(&NewReservation {
                resource_id: gym.id,
                requester_id: UserId::new("u-1"),
                purpose: "Practice".to_owned(),
                date_from: day(10),
                date_to: day(10),
                created_at: at(1, 8),
            })
            .await
            .expect("reservation");
        let steps = tx
            .insert_steps(reservation.id, &[WorkflowStep::new("a-1", 1)])
            .await
            .expect("steps");

        let approver = UserId::new("a-1");
        assert!(tx
            .decide_step(steps[0].id, &approver, StepStatus::Approved, at(2, 9), None)
            .await
            .expect("first decision"));
        assert!(!tx
            .decide_step(steps[0].id, &approver, StepStatus::Rejected, at(2, 10), None)
            .await
            .expect("second decision"));

        assert!(tx
            .set_reservation_status(
                reservation.id,
                ReservationStatus::Pending,
                ReservationStatus::Approved
            )
            .await
            .expect("first cas"));
        assert!(!tx
            .set_reservation_status(
                reservation.id,
                ReservationStatus::Pending,
                ReservationStatus::Cancelled
            )
            .await
            .expect("second cas"));
    }

    #[tokio::test]
    async fn expired_pending_compares_earliest_slot_start() {
        let store = setup_store().await;
        let mut tx = store.begin().await.expect("begin");
        let gym = tx.insert_resource("Gym", "venue").await.expect("resource");
        let mut ids = Vec::new();
        for (d, start) in [(10, 9), (10, 15), (12, 9)] {
            let reservation = tx
                .insert_reservation(&NewReservation {
                    resource_id: gym.id,
                    requester_id: UserId::new("u-1"),
                    purpose: "Practice".to_owned(),
                    date_from: day(d),
                    date_to: day(d),
                    created_at: at(1, 8),
                })
                .await
                .expect("reservation");
            tx.insert_slots(reservation.id, &[slot(d, start, start + 1)]).await.expect("slots");
            ids.push(reservation.id);
        }
        tx.commit().await.expect("commit");

        let expired = store.expired_pending(at(10, 12)).await.expect("expired");
        assert_eq!(expired, vec![ids[0]]);
    }

    #[tokio::test]
    async fn activity_entries_keep_append_order_and_metadata() {
        let store = setup_store().await;
        let mut tx = store.begin().await.expect("begin");
        let gym = tx.insert_resource("Gym", "venue").await.expect("resource");
        let reservation = tx
            .insert_reservation(&NewReservation {
                resource_id: gym.id,
                requester_id: UserId::new("u-1"),
                purpose: "Practice".to_owned(),
                date_from: day(10),
                date_to: day(10),
                created_at: at(1, 8),
            })
            .await
            .expect("reservation");
        let created = ActivityLogEntry::new(
            reservation.id,
            Actor::User(UserId::new("u-1")),
            ActivityAction::Created,
            "created",
            at(1, 8),
        )
        .with_metadata("resource_name", "Gym");
        let swept = ActivityLogEntry::new(
            reservation.id,
            Actor::System,
            ActivityAction::AutoCancelled,
            "expired",
            at(11, 0),
        )
        .with_reservation_status(ReservationStatus::Pending, ReservationStatus::Cancelled)
        .with_comment(Some("bye"));
        tx.append_activity(&created).await.expect("created entry");
        tx.append_activity(&swept).await.expect("swept entry");
        tx.commit().await.expect("commit");

        let history = store.activity_for(reservation.id).await.expect("history");
        assert_eq!(history, vec![created, swept]);
    }
}

//! PostgreSQL document store.
//!
//! Transactions lock every row they read with `SELECT ... FOR UPDATE`, so two
//! transactions racing for the same item are serialized by the database.
//! Deadlocks and serialization failures come back as
//! [`AppError::TransactionConflict`](crate::error::AppError::TransactionConflict).

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    archive_not_found, item_not_found, reservation_not_found, waitlist_not_found, Store, StoreTx,
};
use crate::{
    error::AppResult,
    models::{
        archive::ArchiveRow, item::ItemRow, reservation::ReservationRow, ArchiveEntry, Item,
        Reservation, WaitlistEntry,
    },
};

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn list_items(&self) -> AppResult<Vec<Item>> {
        sqlx::query_as::<_, ItemRow>("SELECT * FROM items ORDER BY created_at DESC, name")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Item::try_from)
            .collect()
    }

    async fn list_reservations(&self) -> AppResult<Vec<Reservation>> {
        sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Reservation::try_from)
            .collect()
    }

    async fn list_waitlist(&self) -> AppResult<Vec<WaitlistEntry>> {
        let entries = sqlx::query_as::<_, WaitlistEntry>(
            "SELECT * FROM waitlist ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn list_archives(&self) -> AppResult<Vec<ArchiveEntry>> {
        sqlx::query_as::<_, ArchiveRow>("SELECT * FROM archives ORDER BY archived_at DESC, id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ArchiveEntry::try_from)
            .collect()
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> AppResult<Item> {
        sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| item_not_found(id))
            .and_then(Item::try_from)
    }

    async fn get_reservation(&self, id: Uuid) -> AppResult<Reservation> {
        sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| reservation_not_found(id))
            .and_then(Reservation::try_from)
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn item(&mut self, id: Uuid) -> AppResult<Option<Item>> {
        sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Item::try_from)
            .transpose()
    }

    async fn insert_item(&mut self, item: &Item) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, name, category, age_group, description, quantity,
                               total_quantity, status, images, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(item.id)
        .bind(&item.name)
        .bind(&item.category)
        .bind(&item.age_group)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.total_quantity)
        .bind(item.status.as_str())
        .bind(&item.images)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET name = $2, category = $3, age_group = $4, description = $5, quantity = $6,
                total_quantity = $7, status = $8, images = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(&item.name)
        .bind(&item.category)
        .bind(&item.age_group)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.total_quantity)
        .bind(item.status.as_str())
        .bind(&item.images)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(item_not_found(item.id));
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(item_not_found(id));
        }
        Ok(())
    }

    async fn reservation(&mut self, id: Uuid) -> AppResult<Option<Reservation>> {
        sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn insert_reservation(&mut self, r: &Reservation) -> AppResult<()> {
        let loan = r.loan.as_ref();
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, item_id, item_name, parent_name, parent_email, child_name, preferred_day,
                note, status, bag_no, loan_start_date, due_date, due_reminder_sent,
                overdue_3day_sent, extended, inventory_committed, review_return_at,
                notification_error, notification_error_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            "#,
        )
        .bind(r.id)
        .bind(r.item_id)
        .bind(&r.item_name)
        .bind(&r.parent_name)
        .bind(&r.parent_email)
        .bind(&r.child_name)
        .bind(&r.preferred_day)
        .bind(&r.note)
        .bind(r.status.as_str())
        .bind(&r.bag_no)
        .bind(loan.map(|l| l.loan_start_date))
        .bind(loan.map(|l| l.due_date))
        .bind(loan.map(|l| l.due_reminder_sent).unwrap_or(false))
        .bind(loan.map(|l| l.overdue_3day_sent).unwrap_or(false))
        .bind(loan.map(|l| l.extended).unwrap_or(false))
        .bind(r.inventory_committed)
        .bind(r.review_return_at)
        .bind(&r.notification_error)
        .bind(r.notification_error_at)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_reservation(&mut self, r: &Reservation) -> AppResult<()> {
        let loan = r.loan.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, bag_no = $3, loan_start_date = $4, due_date = $5,
                due_reminder_sent = $6, overdue_3day_sent = $7, extended = $8,
                inventory_committed = $9, review_return_at = $10, notification_error = $11,
                notification_error_at = $12, note = $13, preferred_day = $14, updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(r.id)
        .bind(r.status.as_str())
        .bind(&r.bag_no)
        .bind(loan.map(|l| l.loan_start_date))
        .bind(loan.map(|l| l.due_date))
        .bind(loan.map(|l| l.due_reminder_sent).unwrap_or(false))
        .bind(loan.map(|l| l.overdue_3day_sent).unwrap_or(false))
        .bind(loan.map(|l| l.extended).unwrap_or(false))
        .bind(r.inventory_committed)
        .bind(r.review_return_at)
        .bind(&r.notification_error)
        .bind(r.notification_error_at)
        .bind(&r.note)
        .bind(&r.preferred_day)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(reservation_not_found(r.id));
        }
        Ok(())
    }

    async fn delete_reservation(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(reservation_not_found(id));
        }
        Ok(())
    }

    async fn count_committed(&mut self, item_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE item_id = $1 AND inventory_committed",
        )
        .bind(item_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn waitlist_entry(&mut self, id: Uuid) -> AppResult<Option<WaitlistEntry>> {
        let entry = sqlx::query_as::<_, WaitlistEntry>(
            "SELECT * FROM waitlist WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(entry)
    }

    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO waitlist (id, item_id, item_name, parent_name, parent_email, child_name,
                                  note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.item_id)
        .bind(&entry.item_name)
        .bind(&entry.parent_name)
        .bind(&entry.parent_email)
        .bind(&entry.child_name)
        .bind(&entry.note)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_waitlist_entry(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM waitlist WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(waitlist_not_found(id));
        }
        Ok(())
    }

    async fn archive_entry(&mut self, id: Uuid) -> AppResult<Option<ArchiveEntry>> {
        sqlx::query_as::<_, ArchiveRow>("SELECT * FROM archives WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(ArchiveEntry::try_from)
            .transpose()
    }

    async fn insert_archive_entry(&mut self, entry: &ArchiveEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO archives (id, item_id, item_name, parent_name, parent_email, child_name,
                                  preferred_day, note, status, archive_reason, bag_no,
                                  loan_start_date, due_date, created_at, archived_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(entry.id)
        .bind(entry.item_id)
        .bind(&entry.item_name)
        .bind(&entry.parent_name)
        .bind(&entry.parent_email)
        .bind(&entry.child_name)
        .bind(&entry.preferred_day)
        .bind(&entry.note)
        .bind(&entry.status)
        .bind(entry.archive_reason.as_str())
        .bind(&entry.bag_no)
        .bind(entry.loan_start_date)
        .bind(entry.due_date)
        .bind(entry.created_at)
        .bind(entry.archived_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_archive_note(&mut self, id: Uuid, note: Option<&str>) -> AppResult<()> {
        let result = sqlx::query("UPDATE archives SET note = $2 WHERE id = $1")
            .bind(id)
            .bind(note)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(archive_not_found(id));
        }
        Ok(())
    }

    async fn delete_archive_entry(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM archives WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(archive_not_found(id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

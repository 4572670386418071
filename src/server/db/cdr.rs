//! Call detail record persistence.

use sqlx::PgPool;

use crate::models::CdrRecord;

pub async fn insert(pool: &PgPool, record: &CdrRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO cdr (call_date, clid, src, dst, dcontext, channel,
                         dstchannel, lastapp, lastdata, duration, billsec,
                         disposition, amaflags, uniqueid, userfield)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(record.call_date)
    .bind(&record.clid)
    .bind(&record.src)
    .bind(&record.dst)
    .bind(&record.dcontext)
    .bind(&record.channel)
    .bind(&record.dstchannel)
    .bind(&record.lastapp)
    .bind(&record.lastdata)
    .bind(record.duration)
    .bind(record.billsec)
    .bind(&record.disposition)
    .bind(record.amaflags)
    .bind(&record.uniqueid)
    .bind(&record.userfield)
    .execute(pool)
    .await?;

    Ok(())
}

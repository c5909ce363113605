use anyhow::Result;
use rusqlite::params;

use super::Db;

/// A pricing row consulted by the Token Tracker (C4) to cost a usage event.
#[derive(Debug, Clone, Copy)]
pub struct PricingRow {
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    pub markup_pct: f64,
}

impl Db {
    pub async fn get_pricing(&self, provider_variant: &str) -> Result<Option<PricingRow>> {
        let conn = self.conn.lock().await;
        let row = conn.query_row(
            "SELECT input_price_per_million, output_price_per_million, markup_pct FROM pricing WHERE provider_variant = ?1",
            params![provider_variant],
            |r| {
                Ok(PricingRow {
                    input_price_per_million: r.get(0)?,
                    output_price_per_million: r.get(1)?,
                    markup_pct: r.get(2)?,
                })
            },
        );
        match row {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn upsert_pricing(&self, provider_variant: &str, p: PricingRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pricing (provider_variant, input_price_per_million, output_price_per_million, markup_pct)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider_variant) DO UPDATE SET
                input_price_per_million = excluded.input_price_per_million,
                output_price_per_million = excluded.output_price_per_million,
                markup_pct = excluded.markup_pct",
            params![provider_variant, p.input_price_per_million, p.output_price_per_million, p.markup_pct],
        )?;
        Ok(())
    }
}

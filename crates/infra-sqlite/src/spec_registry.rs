// SQLite SpecRegistry Implementation

use async_trait::async_trait;
use photospec_core::domain::{OutputFormat, PhotoSpec, PixelRange};
use photospec_core::error::{AppError, Result};
use photospec_core::port::SpecRegistry;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::map_sqlx_error;

pub struct SqliteSpecRegistry {
    pool: SqlitePool,
}

impl SqliteSpecRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a country spec after validating it
    pub async fn upsert(&self, spec: &PhotoSpec) -> Result<()> {
        spec.validate()?;

        let (top_min, top_max) = split_range(spec.top_margin_px_range);
        let (bottom_min, bottom_max) = split_range(spec.bottom_margin_px_range);
        let max_file_size = spec
            .max_file_size_bytes
            .map(i64::try_from)
            .transpose()
            .map_err(|_| {
                AppError::Validation(format!("{}: max file size out of range", spec.country_id))
            })?;

        sqlx::query(
            r#"
            INSERT INTO countries (
                country_id, name, output_width_px, output_height_px, head_height_ratio,
                top_margin_min_px, top_margin_max_px, bottom_margin_min_px, bottom_margin_max_px,
                max_file_size_bytes, output_format, min_jpeg_quality, dpi
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(country_id) DO UPDATE SET
                name = excluded.name,
                output_width_px = excluded.output_width_px,
                output_height_px = excluded.output_height_px,
                head_height_ratio = excluded.head_height_ratio,
                top_margin_min_px = excluded.top_margin_min_px,
                top_margin_max_px = excluded.top_margin_max_px,
                bottom_margin_min_px = excluded.bottom_margin_min_px,
                bottom_margin_max_px = excluded.bottom_margin_max_px,
                max_file_size_bytes = excluded.max_file_size_bytes,
                output_format = excluded.output_format,
                min_jpeg_quality = excluded.min_jpeg_quality,
                dpi = excluded.dpi
            "#,
        )
        .bind(&spec.country_id)
        .bind(&spec.name)
        .bind(spec.output_width_px as i64)
        .bind(spec.output_height_px as i64)
        .bind(spec.head_height_ratio)
        .bind(top_min)
        .bind(top_max)
        .bind(bottom_min)
        .bind(bottom_max)
        .bind(max_file_size)
        .bind(spec.output_format.to_string())
        .bind(spec.min_jpeg_quality as i64)
        .bind(spec.dpi as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        info!(country_id = %spec.country_id, "Country spec stored");
        Ok(())
    }
}

fn split_range(range: Option<PixelRange>) -> (Option<i64>, Option<i64>) {
    match range {
        Some(r) => (Some(r.min as i64), Some(r.max as i64)),
        None => (None, None),
    }
}

#[async_trait]
impl SpecRegistry for SqliteSpecRegistry {
    async fn lookup(&self, country_id: &str) -> Result<Option<PhotoSpec>> {
        let row = sqlx::query_as::<_, CountryRow>("SELECT * FROM countries WHERE country_id = ?")
            .bind(country_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(CountryRow::into_spec).transpose()
    }

    async fn list(&self) -> Result<Vec<PhotoSpec>> {
        let rows: Vec<CountryRow> =
            sqlx::query_as("SELECT * FROM countries ORDER BY country_id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(CountryRow::into_spec).collect()
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct CountryRow {
    country_id: String,
    name: String,
    output_width_px: i64,
    output_height_px: i64,
    head_height_ratio: f64,
    top_margin_min_px: Option<i64>,
    top_margin_max_px: Option<i64>,
    bottom_margin_min_px: Option<i64>,
    bottom_margin_max_px: Option<i64>,
    max_file_size_bytes: Option<i64>,
    output_format: String,
    min_jpeg_quality: i64,
    dpi: i64,
}

impl CountryRow {
    fn into_spec(self) -> Result<PhotoSpec> {
        let id = self.country_id.clone();
        let column = |name: &str| {
            AppError::Database(format!("Country {}: column {} out of range", id, name))
        };

        let output_format = match self.output_format.as_str() {
            "JPEG" => OutputFormat::Jpeg,
            other => {
                return Err(AppError::Database(format!(
                    "Country {}: unsupported output format {}",
                    id, other
                )))
            }
        };

        let spec = PhotoSpec {
            country_id: self.country_id.clone(),
            name: self.name,
            output_width_px: u32::try_from(self.output_width_px)
                .map_err(|_| column("output_width_px"))?,
            output_height_px: u32::try_from(self.output_height_px)
                .map_err(|_| column("output_height_px"))?,
            head_height_ratio: self.head_height_ratio,
            top_margin_px_range: pixel_range(self.top_margin_min_px, self.top_margin_max_px)
                .map_err(|_| column("top_margin"))?,
            bottom_margin_px_range: pixel_range(
                self.bottom_margin_min_px,
                self.bottom_margin_max_px,
            )
            .map_err(|_| column("bottom_margin"))?,
            max_file_size_bytes: self
                .max_file_size_bytes
                .map(u64::try_from)
                .transpose()
                .map_err(|_| column("max_file_size_bytes"))?,
            output_format,
            min_jpeg_quality: u8::try_from(self.min_jpeg_quality)
                .map_err(|_| column("min_jpeg_quality"))?,
            dpi: u16::try_from(self.dpi).map_err(|_| column("dpi"))?,
        };
        Ok(spec)
    }
}

/// A range exists only when both bounds are set
fn pixel_range(
    min: Option<i64>,
    max: Option<i64>,
) -> std::result::Result<Option<PixelRange>, std::num::TryFromIntError> {
    match (min, max) {
        (Some(min), Some(max)) => Ok(Some(PixelRange::new(
            u32::try_from(min)?,
            u32::try_from(max)?,
        ))),
        _ => Ok(None),
    }
}

//! Table QR codes.
//!
//! A table's code encodes `{public_base_url}/t/{table_id}` and is stored as an
//! SVG data URL, so regenerating it yields the same target.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use qrcode::{render::svg, EcLevel, QrCode};
use uuid::Uuid;

pub struct TableQr {
    /// `data:image/svg+xml;base64,...`
    pub image_url: String,
    /// The URL the code points at.
    pub target: String,
}

pub fn table_target(public_base_url: &str, table_id: Uuid) -> String {
    format!("{}/t/{}", public_base_url.trim_end_matches('/'), table_id)
}

pub fn render_svg(data: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
        .map_err(|e| anyhow!("qr encode failed: {e}"))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(300, 300)
        .quiet_zone(true)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

pub fn generate_table_qr(public_base_url: &str, table_id: Uuid) -> Result<TableQr> {
    let target = table_target(public_base_url, table_id);
    let svg = render_svg(&target)?;
    Ok(TableQr {
        image_url: format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)),
        target,
    })
}

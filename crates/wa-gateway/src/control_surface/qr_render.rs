use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::QrCode;

const QR_MIN_DIMENSION_PX: u32 = 256;

/// Renders a pairing payload as an SVG QR code wrapped in a data URL.
pub(super) fn render_qr_svg_data_url(payload: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(QR_MIN_DIMENSION_PX, QR_MIN_DIMENSION_PX)
        .build();
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(image.as_bytes())
    ))
}

use qrcode::{render::svg, EcLevel, QrCode};

use super::ExportError;

/// Render `data` as a standalone SVG QR code.
pub fn qr_svg(data: &str, size: u32) -> Result<String, ExportError> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
        .map_err(|e| ExportError::Qr(e.to_string()))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(size, size)
        .quiet_zone(true)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_svg() {
        let svg = qr_svg("7d7c6c0e-9f2a-4f57-9a3b-2f0f8f1f5b11", 200).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }
}

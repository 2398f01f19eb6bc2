//! Scannable confirmation payload.
//!
//! Appointment confirmations embed a QR image so the service desk can pull
//! the booking up by scanning the email. The payload is plain JSON; the
//! image is an inline SVG so the HTML body stays self-contained.

use crate::model::AppointmentSnapshot;
use anyhow::Result;
use qrcode::render::svg;
use qrcode::QrCode;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPayload {
    pub booking_reference: String,
    pub appointment_id: String,
    pub user_id: String,
    pub service: Option<String>,
    pub department: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
}

pub fn confirmation_payload(appointment: &AppointmentSnapshot) -> ConfirmationPayload {
    ConfirmationPayload {
        booking_reference: appointment.booking_reference.clone(),
        appointment_id: appointment.id.clone(),
        user_id: appointment.citizen_id.clone(),
        service: appointment.service_name.clone(),
        department: appointment.department_name.clone(),
        date: appointment.slot_date.map(|d| d.to_string()),
        start_time: appointment.slot_start.clone(),
    }
}

/// Render the payload as an SVG QR image suitable for inline embedding.
pub fn render_svg(payload: &ConfirmationPayload) -> Result<String> {
    let json = serde_json::to_string(payload)?;
    let code = QrCode::new(json.as_bytes())?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(220, 220)
        .build();
    Ok(image)
}

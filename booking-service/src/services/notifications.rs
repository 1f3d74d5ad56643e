//! Booking notifications over SMS.
//!
//! Every outgoing text goes through [`sanitize_sms`] before it reaches the
//! provider. Sends are best-effort: failures are logged and reported back,
//! never propagated.

use crate::models::{BookingStatus, FareRecord};
use crate::services::sms::{SmsMessage, SmsProvider};
use std::sync::Arc;

const NOT_PROVIDED: &str = "Not Provided";

/// Make text safe for the plain-ASCII delivery route.
pub fn sanitize_sms(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2013}' | '\u{2014}' | '\u{2012}' | '\u{2212}' => out.push('-'),
            '\u{20B9}' | '\u{2022}' | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}' => {}
            c if c.is_ascii() => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn safe(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        NOT_PROVIDED
    } else {
        trimmed
    }
}

/// Whole rupees print without decimals, anything else with two.
fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{:.0}", amount)
    } else {
        format!("{:.2}", amount)
    }
}

pub fn customer_message(record: &FareRecord) -> String {
    // Operator-reviewed bookings are only acknowledged until someone confirms them.
    let headline = match record.status {
        BookingStatus::Pending => "booking request has been received and will be confirmed shortly",
        _ => "booking is confirmed",
    };
    let mut message = format!(
        "Hi {}, your ItarsiTaxi {}. Car: {}, Fare: Rs{}, Pickup: {} {} from {}.",
        safe(&record.name),
        headline,
        safe(&record.car_type.to_string()),
        format_amount(record.total_fare),
        safe(&record.pickup_date),
        safe(&record.pickup_time),
        safe(&record.pickup_location),
    );
    if record.payment_mode.is_prepaid() {
        message.push_str(&format!(
            " Advance paid: Rs{}.",
            format_amount(record.advance_amount)
        ));
    }
    message.push_str(" Thank you!");
    message
}

pub fn admin_message(record: &FareRecord) -> String {
    let mut message = format!(
        "New booking by {} ({}). Pickup: {} {} {}, Drop: {}, Car: {}, Fare: Rs{}",
        safe(&record.name),
        safe(&record.mobile),
        safe(&record.pickup_location),
        safe(&record.pickup_date),
        safe(&record.pickup_time),
        safe(&record.drop_location),
        safe(&record.car_type.to_string()),
        format_amount(record.total_fare),
    );
    if record.payment_mode.is_prepaid() {
        message.push_str(&format!(
            ", Advance: Rs{} via {}",
            format_amount(record.advance_amount),
            record.payment_mode
        ));
    }
    message
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub customer_sent: bool,
    pub admin_sent: bool,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    provider: Arc<dyn SmsProvider>,
    admin_phone: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(provider: Arc<dyn SmsProvider>, admin_phone: impl Into<String>) -> Self {
        let admin_phone = admin_phone.into();
        Self {
            provider,
            admin_phone: (!admin_phone.trim().is_empty()).then_some(admin_phone),
        }
    }

    async fn send(&self, to: &str, text: &str, audience: &'static str, booking_id: &str) -> bool {
        let sms = SmsMessage {
            to: to.to_string(),
            body: sanitize_sms(text),
        };
        match self.provider.send(&sms).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    booking_id = %booking_id,
                    audience = audience,
                    error = %e,
                    "Booking notification failed"
                );
                false
            }
        }
    }

    /// Notify the customer and the admin contact concurrently.
    pub async fn send_booking_notifications(&self, record: &FareRecord) -> NotificationReport {
        let customer = customer_message(record);
        let admin = admin_message(record);

        let customer_send = self.send(&record.mobile, &customer, "customer", &record.id);
        let admin_send = async {
            match &self.admin_phone {
                Some(phone) => self.send(phone, &admin, "admin", &record.id).await,
                None => {
                    tracing::warn!(booking_id = %record.id, "Admin phone not configured, skipping admin SMS");
                    false
                }
            }
        };

        let (customer_sent, admin_sent) = tokio::join!(customer_send, admin_send);
        NotificationReport {
            customer_sent,
            admin_sent,
        }
    }
}

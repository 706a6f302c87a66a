//! Fixed conversation text: system prompt, greeting, fallback, context hints.

use crate::booking::BookingField;
use crate::session::ReplyHint;

/// Spoken before any user speech is accepted.
pub const GREETING: &str =
    "Hello, this is DropTruck AI sales agent calling about your enquiry. How can I assist you today?";

/// Substituted when reply generation fails or times out.
pub const FALLBACK_REPLY: &str =
    "I'm having trouble processing that right now. Could you try again?";

/// Instructions for the reply model. `{marker}` is replaced with the termination marker.
const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are a professional sales agent for DropTruck, a truck booking service in India. \
Speak in short, natural sentences suitable for a phone call.

Collect these details, one or two at a time:
1. Pickup location
2. Drop location
3. Vehicle type (for example Tata Ace, Bolero, 407, 14 Feet, 20 Feet Trailer)
4. Body type: open or container
5. Material being transported
6. Trip date

Ask only for details that are still missing. Once everything is known, restate all six \
details in one message starting with \"Let me confirm\" and ask whether they are correct. \
Use the exact place names, vehicle name and date you restate, because that message is \
recorded as the booking.

When the customer confirms, thank them, tell them the team will contact them soon, and \
end that final message with {marker}. If the customer is not interested, politely close \
the call and end with {marker}. Never use {marker} in any other message.";

pub fn system_prompt(termination_marker: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE.replace("{marker}", termination_marker)
}

/// Per-turn guidance sent alongside the history.
pub fn render_hint(hint: &ReplyHint) -> String {
    let mut lines = Vec::new();
    lines.push("Booking collected so far:".to_string());
    for field in BookingField::REQUIRED {
        let value = hint
            .booking
            .get(field)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "not provided".to_string());
        lines.push(format!("- {}: {}", field.label(), value));
    }
    if hint.missing_fields.is_empty() {
        if hint.request_confirmation {
            lines.push(
                "All details are collected. Restate them to the customer and ask for confirmation."
                    .to_string(),
            );
        }
    } else {
        let missing: Vec<&str> = hint.missing_fields.iter().map(|f| f.label()).collect();
        lines.push(format!("Still missing: {}.", missing.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::BookingRecord;

    #[test]
    fn system_prompt_embeds_marker() {
        let prompt = system_prompt("[CALL_COMPLETE]");
        assert!(prompt.contains("end that final message with [CALL_COMPLETE]"));
        assert!(!prompt.contains("{marker}"));
    }

    #[test]
    fn hint_lists_missing_fields() {
        let mut booking = BookingRecord::new();
        booking.pickup_location = Some("Chennai".into());
        let hint = ReplyHint {
            missing_fields: booking.missing_fields(),
            booking,
            request_confirmation: false,
        };
        let text = render_hint(&hint);
        assert!(text.contains("- Pickup Location: Chennai"));
        assert!(text.contains("Still missing: Drop Location, Vehicle Type"));
        assert!(!text.contains("ask for confirmation"));
    }

    #[test]
    fn hint_requests_confirmation_when_complete() {
        let hint = ReplyHint {
            booking: BookingRecord::new(),
            missing_fields: Vec::new(),
            request_confirmation: true,
        };
        assert!(render_hint(&hint).contains("ask for confirmation"));
    }
}

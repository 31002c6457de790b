//! Built-in live ticket prices, shown when the remote table is empty.

use crate::models::{LiveTicket, Trend};

fn ticket(
    id: &str,
    target: &str,
    price_ugx: u64,
    usd: (f64, f64),
    trend: Trend,
) -> LiveTicket {
    LiveTicket {
        id: id.to_string(),
        origin: "Entebbe (EBB)".to_string(),
        target: target.to_string(),
        price_ugx,
        min_usd: Some(usd.0),
        max_usd: Some(usd.1),
        trend,
    }
}

/// The fixed five-entry fallback set, ids `d1`..`d5`.
pub fn live_ticket_seed() -> Vec<LiveTicket> {
    vec![
        ticket("d1", "Dubai (DXB)", 1_850_000, (480.0, 620.0), Trend::Down),
        ticket("d2", "London (LHR)", 3_400_000, (880.0, 1_150.0), Trend::Up),
        ticket("d3", "Nairobi (NBO)", 650_000, (160.0, 230.0), Trend::Stable),
        ticket("d4", "Johannesburg (JNB)", 1_450_000, (370.0, 510.0), Trend::Up),
        ticket("d5", "Guangzhou (CAN)", 2_900_000, (740.0, 960.0), Trend::Down),
    ]
}

use rand::Rng;
use serde_json::{Value, json};

/// A plausible node payload, in the firmware's key convention.
pub fn random_payload(rng: &mut impl Rng, device_id: &str, reported_ip: &str) -> Value {
    let mut sample = |low: f64, high: f64| (rng.gen_range(low..high) * 100.0).round() / 100.0;

    json!({
        "Device": device_id,
        "IP": reported_ip,
        "LUX": sample(100.0, 500.0),
        "NH3": sample(5.0, 20.0),
        "HS": sample(30.0, 350.0),
        "H": sample(50.0, 90.0),
        "T": sample(18.0, 35.0),
    })
}

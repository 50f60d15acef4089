use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(rename = "temp")]
    pub temperature_c: f32,
    #[serde(rename = "humidity")]
    pub relative_humidity: f32,
}

impl SensorReading {
    pub fn new(temperature_c: f32, relative_humidity: f32) -> Self {
        Self {
            temperature_c,
            relative_humidity,
        }
    }

    pub fn is_plausible(&self) -> bool {
        self.temperature_c.is_finite()
            && self.relative_humidity.is_finite()
            && (-40.0..=85.0).contains(&self.temperature_c)
            && (0.0..=100.0).contains(&self.relative_humidity)
    }

    /// Two decimals, the format published for the temperature field.
    pub fn temperature_field(&self) -> String {
        format!("{:.2}", self.temperature_c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_short_keys() {
        let reading = SensorReading::new(21.5, 40.25);
        let value = serde_json::to_value(reading).unwrap();
        assert_eq!(value, serde_json::json!({ "temp": 21.5, "humidity": 40.25 }));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(SensorReading::new(22.0, 35.0).is_plausible());
        assert!(!SensorReading::new(f32::NAN, 35.0).is_plausible());
        assert!(!SensorReading::new(22.0, 120.0).is_plausible());
    }

    #[test]
    fn temperature_field_has_two_decimals() {
        assert_eq!(SensorReading::new(23.456, 0.0).temperature_field(), "23.46");
        assert_eq!(SensorReading::new(-4.0, 0.0).temperature_field(), "-4.00");
    }
}

use serde::{Deserialize, Serialize};

/// Decoder options forwarded opaquely to the inference engine.
///
/// The set of recognized keys is closed: unknown keys fail deserialization,
/// so a bad request is rejected at intake instead of surfacing as a decoder
/// error halfway through a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DecodeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Temperature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_speech_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_on_previous_text: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_timestamps: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepend_punctuations: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_punctuations: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_timestamps: Option<ClipTimestamps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hallucination_silence_threshold: Option<f64>,
}

impl DecodeOptions {
    /// Parses a stored JSON blob back into options, rejecting unknown keys.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw.clone())
    }

    /// Semantic validation beyond what the type system enforces. Called
    /// at intake (reject with 4xx) and again by the processor before a
    /// worker is checked out.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(lang) = &self.language {
            if lang.is_empty() || lang.len() > 10 {
                return Err(format!("invalid language code: {:?}", lang));
            }
        }
        match &self.temperature {
            Some(Temperature::Single(t)) => validate_temperature(*t)?,
            Some(Temperature::Schedule(ts)) => {
                if ts.is_empty() {
                    return Err("temperature schedule must not be empty".into());
                }
                for t in ts {
                    validate_temperature(*t)?;
                }
            }
            None => {}
        }
        if let Some(t) = self.compression_ratio_threshold {
            if !t.is_finite() || t <= 0.0 {
                return Err(format!("compression_ratio_threshold out of range: {}", t));
            }
        }
        if let Some(t) = self.no_speech_threshold {
            if !t.is_finite() || !(0.0..=1.0).contains(&t) {
                return Err(format!("no_speech_threshold out of range: {}", t));
            }
        }
        if let Some(t) = self.hallucination_silence_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(format!(
                    "hallucination_silence_threshold out of range: {}",
                    t
                ));
            }
        }
        match &self.clip_timestamps {
            Some(ClipTimestamps::Text(raw)) => {
                for part in raw.split(',') {
                    let value: f64 = part
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid clip timestamp: {:?}", part))?;
                    if !value.is_finite() || value < 0.0 {
                        return Err(format!("clip timestamp out of range: {}", value));
                    }
                }
            }
            Some(ClipTimestamps::Seconds(values)) => {
                for value in values {
                    if !value.is_finite() || *value < 0.0 {
                        return Err(format!("clip timestamp out of range: {}", value));
                    }
                }
            }
            None => {}
        }
        Ok(())
    }
}

fn validate_temperature(t: f64) -> Result<(), String> {
    if !t.is_finite() || !(0.0..=2.0).contains(&t) {
        return Err(format!("temperature out of range: {}", t));
    }
    Ok(())
}

/// A single sampling temperature or an ordered fallback schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Temperature {
    Single(f64),
    Schedule(Vec<f64>),
}

/// Time ranges to decode, either as a comma-separated string
/// ("0,30,60,90") or as an explicit list of seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClipTimestamps {
    Text(String),
    Seconds(Vec<f64>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = serde_json::json!({"language": "en", "beam_width": 5});
        assert!(DecodeOptions::from_json(&raw).is_err());
    }

    #[test]
    fn temperature_accepts_scalar_and_schedule() {
        let single: DecodeOptions =
            serde_json::from_value(serde_json::json!({"temperature": 0.8})).unwrap();
        assert_eq!(single.temperature, Some(Temperature::Single(0.8)));

        let schedule: DecodeOptions =
            serde_json::from_value(serde_json::json!({"temperature": [0.8, 1.0]})).unwrap();
        assert_eq!(
            schedule.temperature,
            Some(Temperature::Schedule(vec![0.8, 1.0]))
        );
    }

    #[test]
    fn empty_object_yields_defaults() {
        let opts: DecodeOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(opts, DecodeOptions::default());
    }

    #[test]
    fn out_of_range_thresholds_fail_validation() {
        let opts = DecodeOptions {
            no_speech_threshold: Some(1.5),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = DecodeOptions {
            temperature: Some(Temperature::Schedule(vec![0.8, f64::NAN])),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn clip_timestamp_text_is_parsed_numerically() {
        let opts = DecodeOptions {
            clip_timestamps: Some(ClipTimestamps::Text("0,30,60".into())),
            ..Default::default()
        };
        assert!(opts.validate().is_ok());

        let opts = DecodeOptions {
            clip_timestamps: Some(ClipTimestamps::Text("0,thirty".into())),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }
}

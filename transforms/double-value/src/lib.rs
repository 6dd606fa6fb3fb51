//! Demo transform: multiplies numeric record values by `SCALE`.
//!
//! Values that are not base-10 integers are filtered with a warning.
//! Build with `cargo build --release --target wasm32-unknown-unknown`.

use recast_sdk::prelude::*;

const DEFAULT_SCALE: &str = "2";
const DEFAULT_OUTPUT_TOPIC: &str = "out";

pub struct Scaler {
    factor: i64,
    topic: String,
}

impl Scaler {
    pub fn new(factor: i64, topic: impl Into<String>) -> Self {
        Self {
            factor,
            topic: topic.into(),
        }
    }

    /// Read `SCALE` and `OUTPUT_TOPIC` from the transform environment.
    ///
    /// # Errors
    ///
    /// Fails fatally if `SCALE` is not an integer.
    pub fn from_env() -> Result<Self, TransformError> {
        let raw = env::var_or("SCALE", DEFAULT_SCALE);
        let factor = raw.trim().parse::<i64>().map_err(|_| {
            TransformError::fatal("BAD_SCALE", format!("SCALE '{raw}' is not an integer"))
        })?;
        Ok(Self::new(factor, env::var_or("OUTPUT_TOPIC", DEFAULT_OUTPUT_TOPIC)))
    }
}

fn parse_number(value: Option<&[u8]>) -> Option<i64> {
    std::str::from_utf8(value?).ok()?.trim().parse().ok()
}

impl TransformFunction for Scaler {
    fn transform(&mut self, record: Record, ctx: &InvocationContext) -> TransformResult {
        let Some(n) = parse_number(record.value()) else {
            ctx.log(
                LogLevel::Warn,
                &format!("offset {}: value is not a number, filtered", ctx.offset()),
            );
            return Ok(Vec::new());
        };
        let Some(scaled) = n.checked_mul(self.factor) else {
            ctx.log(
                LogLevel::Error,
                &format!("offset {}: {n} * {} overflows, filtered", ctx.offset(), self.factor),
            );
            return Ok(Vec::new());
        };
        let out = record.with_value(Some(scaled.to_string()));
        Ok(vec![Routed::new(self.topic.clone(), out)])
    }
}

recast_sdk::transform_main!(@setup |rt: &mut TransformRuntime| {
    let scaler = Scaler::from_env()?;
    rt.register(scaler)
});

//! Decimal-string (de)serialization for 256-bit quantities. `U256` parses hex
//! through `FromStr`, but the Beacon API encodes `base_fee_per_gas` and block
//! values as decimal strings.

use ethereum_types::U256;
use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let string = String::deserialize(deserializer)?;
    U256::from_dec_str(&string).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
    struct Wrapper {
        #[serde(with = "super")]
        value: U256,
    }

    #[test]
    fn round_trips_decimal_strings() {
        let json = r#"{"value":"25000000000"}"#;
        let wrapper = serde_json::from_str::<Wrapper>(json).expect("wrapper deserializes");

        assert_eq!(wrapper.value, U256::from(25_000_000_000_u64));
        assert_eq!(serde_json::to_string(&wrapper).expect("serializes"), json);
    }

    #[test]
    fn rejects_hex_input() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"value":"0x1p"}"#).is_err());
    }
}

//! (De)serialization for integers the Beacon and remote signing APIs encode
//! as decimal strings. Deserialization accepts the native representation too,
//! which keeps YAML configuration files and JSON fixtures pleasant to write.

use core::{
    fmt::Display,
    marker::PhantomData,
    str::FromStr,
};

use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

enum StringOrNative<T> {
    String(String),
    Native(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for StringOrNative<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> serde::de::Visitor<'de> for Visitor<T> {
            type Value = StringOrNative<T>;

            fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
                formatter.write_str("a string or a native value")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(StringOrNative::String(value.to_owned()))
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Self::Value, E> {
                T::deserialize(serde::de::value::U64Deserializer::new(value))
                    .map(StringOrNative::Native)
            }

            fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Self::Value, E> {
                T::deserialize(serde::de::value::I64Deserializer::new(value))
                    .map(StringOrNative::Native)
            }
        }

        deserializer.deserialize_any(Visitor(PhantomData))
    }
}

pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Deserialize<'de> + FromStr,
    <T as FromStr>::Err: Display,
    D: Deserializer<'de>,
{
    match StringOrNative::deserialize(deserializer)? {
        StringOrNative::String(string) => string.parse().map_err(D::Error::custom),
        StringOrNative::Native(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU64;

    use serde::{Deserialize, Serialize};
    use test_case::test_case;

    #[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
    struct Wrapper {
        #[serde(with = "super")]
        value: u64,
    }

    #[test_case(r#"{"value":"42"}"# => 42; "quoted")]
    #[test_case(r#"{"value":42}"# => 42; "native")]
    fn deserializes_both_representations(json: &str) -> u64 {
        serde_json::from_str::<Wrapper>(json)
            .expect("wrapper deserializes")
            .value
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Wrapper { value: 42 }).expect("wrapper serializes");
        assert_eq!(json, r#"{"value":"42"}"#);
    }

    #[test]
    fn rejects_invalid_strings() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"value":"-1"}"#).is_err());
        assert!(serde_json::from_str::<Wrapper>(r#"{"value":"abc"}"#).is_err());
    }

    #[test]
    fn works_for_non_zero_integers() {
        #[derive(Debug, Deserialize)]
        struct NonZeroWrapper {
            #[serde(with = "super")]
            value: NonZeroU64,
        }

        let wrapper =
            serde_json::from_str::<NonZeroWrapper>(r#"{"value":"12"}"#).expect("deserializes");
        assert_eq!(wrapper.value.get(), 12);

        assert!(serde_json::from_str::<NonZeroWrapper>(r#"{"value":"0"}"#).is_err());
    }
}

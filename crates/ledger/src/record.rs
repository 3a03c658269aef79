use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::AIRDROP_MARKER;

/// One entry of an explorer `tokentx` listing.
///
/// Every field stays in its wire text form. Conversion happens during
/// aggregation so that one malformed field only zeroes that record's amounts.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub time_stamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub token_symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub function_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub token_decimal: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub gas_used: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub gas_price: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub transaction_index: Option<String>,
}

impl TransferRecord {
    pub fn symbol(&self) -> &str {
        self.token_symbol.as_deref().unwrap_or_default()
    }

    pub fn is_airdrop(&self) -> bool {
        self.function_name
            .as_deref()
            .is_some_and(|name| name.starts_with(AIRDROP_MARKER))
    }

    pub fn is_from(&self, wallet: &str) -> bool {
        address_eq(self.from.as_deref(), wallet)
    }

    pub fn is_to(&self, wallet: &str) -> bool {
        address_eq(self.to.as_deref(), wallet)
    }
}

fn address_eq(field: Option<&str>, wallet: &str) -> bool {
    match field {
        Some(address) => address.eq_ignore_ascii_case(wallet),
        None => false,
    }
}

/// Accepts a string, a number, or null. Etherscan clones disagree on whether
/// numeric columns are quoted.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TextVisitor;

    impl<'de> Visitor<'de> for TextVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string, a number, or null")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(TextVisitor)
        }
    }

    deserializer.deserialize_option(TextVisitor)
}

use std::collections::BTreeSet;
use std::fmt;

/// Set of uppercase token symbols a listing is narrowed to. Empty means
/// every symbol passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoinFilter {
    symbols: BTreeSet<String>,
}

impl CoinFilter {
    /// Parses the comma-separated form typed by the user (`"bsc-usd, cake"`).
    pub fn parse(raw: &str) -> Self {
        let symbols = raw
            .split(',')
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .map(str::to_uppercase)
            .collect();
        Self { symbols }
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn allows(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.contains(&symbol.to_uppercase())
    }
}

impl fmt::Display for CoinFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for symbol in &self.symbols {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(symbol)?;
            first = false;
        }
        Ok(())
    }
}

pub mod binance_client;
pub mod coingecko_client;
pub mod llm_client;

use tracing::warn;

use binance_client::BinanceClient;
use coingecko_client::CoinGeckoClient;

/// Keeps the instruments at least one quote source can price. The rest are
/// logged and dropped; instruments only one source knows are kept with a
/// warning, since they lose their fallback.
pub fn quotable_instruments(
    instruments: &[String],
    primary: &BinanceClient,
    secondary: &CoinGeckoClient,
) -> Vec<String> {
    instruments
        .iter()
        .filter(|instrument| {
            match (primary.supports(instrument), secondary.supports(instrument)) {
                (true, true) => true,
                (false, false) => {
                    warn!("No quote source maps {}, dropping it", instrument);
                    false
                }
                (true, false) => {
                    warn!("{} has no secondary quote mapping, primary only", instrument);
                    true
                }
                (false, true) => {
                    warn!("{} has no primary quote mapping, secondary only", instrument);
                    true
                }
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use binance_client::BinanceConfig;
    use coingecko_client::CoinGeckoConfig;

    #[test]
    fn test_unmapped_instruments_are_dropped() {
        let primary = BinanceClient::new(BinanceConfig::default()).unwrap();
        let secondary = CoinGeckoClient::new(CoinGeckoConfig::default()).unwrap();
        let requested: Vec<String> = ["BTC", "ADA", "ETH", "PEPE"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert_eq!(
            quotable_instruments(&requested, &primary, &secondary),
            vec!["BTC".to_string(), "ETH".to_string()]
        );
    }

    #[test]
    fn test_nothing_quotable_yields_empty() {
        let primary = BinanceClient::new(BinanceConfig::default()).unwrap();
        let secondary = CoinGeckoClient::new(CoinGeckoConfig::default()).unwrap();
        assert!(quotable_instruments(&["ADA".to_string()], &primary, &secondary).is_empty());
    }
}

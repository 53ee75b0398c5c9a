use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{ConfigError, Result};
use crate::model::{
    CardDetails, CardExtension, Market, RunConfig, SeatCounts, Stage, TripType, MIN_DAYS_AHEAD,
};

/// Route and calendar defaults for the search form.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlightSection {
    pub origin: String,
    pub destination: String,
    pub days_ahead: u32,
    pub trip_type: TripType,
    pub return_offset: u32,
    pub seats: SeatCounts,
}

impl Default for FlightSection {
    fn default() -> Self {
        FlightSection {
            origin: "Santiago".to_string(),
            destination: "Buenos Aires".to_string(),
            days_ahead: MIN_DAYS_AHEAD,
            trip_type: TripType::OneWay,
            return_offset: 4,
            seats: SeatCounts::default(),
        }
    }
}

/// Base identity for the synthesized passenger roster. The first roster
/// entry doubles as the reservation contact.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactSection {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub document_type: String,
    pub document_number: String,
    pub gender: String,
    pub issue_country: String,
    pub phone_prefix: String,
    pub phone: String,
    pub birth_date: NaiveDate,
}

/// Knobs for how a run executes, independent of what it books.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub market: Market,
    pub headless: bool,
    pub exploration: bool,
    pub exploration_only: bool,
    pub checkpoint: Option<Stage>,
    pub safety_pause_ms: u64,
    pub action_delay_ms: u64,
    pub success_cooldown_secs: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        RunSection {
            market: Market::Cl,
            headless: false,
            exploration: false,
            exploration_only: false,
            checkpoint: None,
            safety_pause_ms: 3_000,
            action_delay_ms: 0,
            success_cooldown_secs: 120,
        }
    }
}

/// Per-market storefront URL and the test card its gateway accepts.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketSection {
    pub url: String,
    pub card: CardSection,
}

/// Flat card table from the config file. Market-specific keys live next to
/// the base fields and are lifted into the typed extension on resolve.
#[derive(Debug, Clone, Deserialize)]
pub struct CardSection {
    pub number: String,
    pub expiry: String,
    pub cvv: String,
    #[serde(default)]
    pub holder: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl CardSection {
    /// Builds the typed card record, pulling the keys the market's gateway
    /// understands out of the flat table. Unrecognized keys pass through.
    pub fn into_card(self, market: Market) -> CardDetails {
        let CardSection {
            number,
            expiry,
            cvv,
            holder,
            mut extra,
        } = self;

        let extension = match market {
            Market::Pe => CardExtension::None,
            Market::Cl => CardExtension::Webpay {
                rut: extra
                    .remove("rut")
                    .unwrap_or_else(|| "11.111.111-1".to_string()),
                password: extra.remove("password").unwrap_or_else(|| "123".to_string()),
            },
            Market::Ar => CardExtension::MercadoPago {
                document_type: extra
                    .remove("document_type")
                    .unwrap_or_else(|| "DNI".to_string()),
                document_number: extra.remove("document_number").unwrap_or_default(),
                email: extra.remove("email"),
                installments_label: extra
                    .remove("installments")
                    .unwrap_or_else(|| "1 cuota".to_string()),
            },
            Market::Br => CardExtension::Cielo {
                card_kind: extra.remove("card_kind"),
                challenge_code: extra.remove("challenge_code"),
            },
        };

        CardDetails {
            number,
            expiry,
            cvv,
            holder,
            extension,
            extra,
        }
    }
}

/// Whole config file: flight defaults, contact identity, run knobs, and one
/// `[markets.XX]` table per supported market.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub flight: FlightSection,
    pub contact: ContactSection,
    #[serde(default)]
    pub run: RunSection,
    pub markets: BTreeMap<Market, MarketSection>,
}

impl BotConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_toml(path.as_ref())
    }

    pub fn market(&self, market: Market) -> Result<&MarketSection> {
        self.markets.get(&market).ok_or_else(|| {
            ConfigError::Invalid(format!("no [markets.{market}] section configured"))
        })
    }

    /// Resolves the immutable parameters for one run against `market`.
    /// Searches closer than the antifraud floor are bumped up to it.
    pub fn run_config(&self, market: Market) -> Result<RunConfig> {
        let section = self.market(market)?;
        Url::parse(&section.url).map_err(|err| {
            ConfigError::Invalid(format!("[markets.{market}] url is invalid: {err}"))
        })?;
        self.flight
            .seats
            .validate()
            .map_err(ConfigError::Invalid)?;

        let mut days_ahead = self.flight.days_ahead;
        if days_ahead < MIN_DAYS_AHEAD {
            warn!(
                requested = days_ahead,
                floor = MIN_DAYS_AHEAD,
                "days_ahead below the antifraud floor, bumping"
            );
            days_ahead = MIN_DAYS_AHEAD;
        }

        if self.flight.trip_type == TripType::RoundTrip && self.flight.return_offset == 0 {
            return Err(ConfigError::Invalid(
                "return_offset must be at least 1 for a round trip".to_string(),
            ));
        }

        let card = section.card.clone().into_card(market);
        card.ensure_complete().map_err(ConfigError::Invalid)?;

        Ok(RunConfig {
            market,
            url: section.url.clone(),
            trip_type: self.flight.trip_type,
            origin: self.flight.origin.clone(),
            destination: self.flight.destination.clone(),
            days_ahead,
            return_offset: self.flight.return_offset,
            seats: self.flight.seats,
            checkpoint: self.run.checkpoint,
            exploration: self.run.exploration || self.run.exploration_only,
            exploration_only: self.run.exploration_only,
            safety_pause: Duration::from_millis(self.run.safety_pause_ms),
            action_delay: Duration::from_millis(self.run.action_delay_ms),
            success_cooldown: Duration::from_secs(self.run.success_cooldown_secs),
            card,
        })
    }
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> &'static str {
        r#"
[flight]
origin = "Santiago"
destination = "Lima"
days_ahead = 20
trip_type = "ROUND_TRIP"
return_offset = 4

[flight.seats]
adults = 2
children = 1
infants = 1

[contact]
first_name = "Maria"
last_name = "Prueba"
email = "maria@example.com"
document_type = "DNI"
document_number = "12345678"
gender = "Femenino"
issue_country = "Chile"
phone_prefix = "+56"
phone = "987654321"
birth_date = "1990-05-14"

[run]
market = "PE"
checkpoint = "checkout"
safety_pause_ms = 1500

[markets.PE]
url = "https://example.test/peru"

[markets.PE.card]
number = "4111111111111111"
expiry = "12/30"
cvv = "123"

[markets.CL]
url = "https://example.test/chile"

[markets.CL.card]
number = "4051885600446623"
expiry = "12/30"
cvv = "123"
rut = "11.111.111-1"
password = "123"
loyalty = "none"
"#
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_full_config() {
        let file = write_config(sample_config());
        let config = BotConfig::from_file(file.path()).unwrap();

        assert_eq!(config.flight.destination, "Lima");
        assert_eq!(config.flight.seats.total(), 4);
        assert_eq!(config.run.market, Market::Pe);
        assert_eq!(config.run.checkpoint, Some(Stage::Checkout));
        assert_eq!(config.run.safety_pause_ms, 1_500);
        assert!(config.markets.contains_key(&Market::Cl));
    }

    #[test]
    fn missing_market_section_is_invalid() {
        let file = write_config(sample_config());
        let config = BotConfig::from_file(file.path()).unwrap();
        assert!(matches!(
            config.run_config(Market::Br),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn market_url_must_be_absolute() {
        let raw = sample_config().replace("https://example.test/peru", "skyairline/peru");
        let file = write_config(&raw);
        let config = BotConfig::from_file(file.path()).unwrap();
        assert!(matches!(
            config.run_config(Market::Pe),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn run_config_bumps_days_to_floor() {
        let raw = sample_config().replace("days_ahead = 20", "days_ahead = 3");
        let file = write_config(&raw);
        let config = BotConfig::from_file(file.path()).unwrap();
        let run = config.run_config(Market::Pe).unwrap();
        assert_eq!(run.days_ahead, MIN_DAYS_AHEAD);
        assert_eq!(run.return_offset, 4);
        assert_eq!(run.payment_method(), "Niubiz");
    }

    #[test]
    fn webpay_card_lifts_typed_extension() {
        let file = write_config(sample_config());
        let config = BotConfig::from_file(file.path()).unwrap();
        let card = config
            .market(Market::Cl)
            .unwrap()
            .card
            .clone()
            .into_card(Market::Cl);

        match &card.extension {
            CardExtension::Webpay { rut, password } => {
                assert_eq!(rut, "11.111.111-1");
                assert_eq!(password, "123");
            }
            other => panic!("unexpected extension: {other:?}"),
        }
        // Keys no extension claims ride along untouched.
        assert_eq!(card.extra.get("loyalty").map(String::as_str), Some("none"));
    }

    #[test]
    fn mercado_pago_defaults_fill_missing_fields() {
        let card = CardSection {
            number: "5031755734530604".to_string(),
            expiry: "11/30".to_string(),
            cvv: "123".to_string(),
            holder: Some("APRO".to_string()),
            extra: BTreeMap::new(),
        }
        .into_card(Market::Ar);

        match &card.extension {
            CardExtension::MercadoPago {
                document_type,
                installments_label,
                ..
            } => {
                assert_eq!(document_type, "DNI");
                assert_eq!(installments_label, "1 cuota");
            }
            other => panic!("unexpected extension: {other:?}"),
        }
    }

    #[test]
    fn io_error_carries_path() {
        let missing = Path::new("/nonexistent/farebot.toml");
        match BotConfig::from_file(missing) {
            Err(ConfigError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Searches less than this many days ahead trip the airline's antifraud
/// checks, so resolution bumps anything lower up to the floor.
pub const MIN_DAYS_AHEAD: u32 = 16;

/// Regional storefront the purchase runs against. Each market pairs a
/// localized site with the payment gateway that market checks out through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Cl,
    Pe,
    Ar,
    Br,
}

impl Market {
    pub const ALL: [Market; 4] = [Market::Cl, Market::Pe, Market::Ar, Market::Br];

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Cl => "CL",
            Market::Pe => "PE",
            Market::Ar => "AR",
            Market::Br => "BR",
        }
    }

    pub fn country(&self) -> &'static str {
        match self {
            Market::Cl => "Chile",
            Market::Pe => "Perú",
            Market::Ar => "Argentina",
            Market::Br => "Brasil",
        }
    }

    /// Display label of the payment gateway tile on this market's checkout.
    pub fn gateway_label(&self) -> &'static str {
        match self {
            Market::Cl => "Webpay",
            Market::Pe => "Niubiz",
            Market::Ar => "Mercado Pago",
            Market::Br => "Cielo",
        }
    }

    /// Browser language to pin so the storefront serves this market's copy.
    pub fn locale(&self) -> &'static str {
        match self {
            Market::Cl => "es-CL",
            Market::Pe => "es-PE",
            Market::Ar => "es-AR",
            Market::Br => "pt-BR",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CL" => Ok(Market::Cl),
            "PE" => Ok(Market::Pe),
            "AR" => Ok(Market::Ar),
            "BR" => Ok(Market::Br),
            other => Err(format!("unknown market: {other}")),
        }
    }
}

/// One-way or round trip. Accepts the spellings operators actually type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::OneWay => "ONE_WAY",
            TripType::RoundTrip => "ROUND_TRIP",
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "OW" | "ONEWAY" | "ONE_WAY" | "SOLO_IDA" => Ok(TripType::OneWay),
            "RT" | "ROUNDTRIP" | "ROUND_TRIP" | "IDA_Y_VUELTA" => Ok(TripType::RoundTrip),
            other => Err(format!("unknown trip type: {other}")),
        }
    }
}

/// Passenger counts requested in the search form. The form always starts
/// at one adult, so the stepper issues `adults - 1` adult clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatCounts {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub infants: u32,
}

impl SeatCounts {
    pub fn total(&self) -> u32 {
        self.adults + self.children + self.infants
    }

    /// Infants ride on an adult's lap; every infant needs one.
    pub fn validate(&self) -> Result<(), String> {
        if self.adults == 0 {
            return Err("at least one adult is required".to_string());
        }
        if self.infants > self.adults {
            return Err(format!(
                "infant count ({}) cannot exceed adult count ({})",
                self.infants, self.adults
            ));
        }
        Ok(())
    }
}

impl Default for SeatCounts {
    fn default() -> Self {
        SeatCounts {
            adults: 1,
            children: 0,
            infants: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PassengerCategory {
    #[serde(rename = "ADT")]
    Adult,
    #[serde(rename = "CHD")]
    Child,
    #[serde(rename = "INF")]
    Infant,
}

impl PassengerCategory {
    pub fn code(&self) -> &'static str {
        match self {
            PassengerCategory::Adult => "ADT",
            PassengerCategory::Child => "CHD",
            PassengerCategory::Infant => "INF",
        }
    }
}

impl fmt::Display for PassengerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PassengerCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADT" | "ADULT" => Ok(PassengerCategory::Adult),
            "CHD" | "CHILD" => Ok(PassengerCategory::Child),
            "INF" | "INFANT" => Ok(PassengerCategory::Infant),
            other => Err(format!("unknown passenger category: {other}")),
        }
    }
}

/// One traveler on the booking. The first passenger in the run's roster is
/// also the reservation contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    pub category: PassengerCategory,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: NaiveDate,
    pub document_type: String,
    pub document_number: String,
    pub gender: String,
    pub issue_country: String,
    pub email: String,
    pub phone_prefix: String,
    pub phone: String,
}

impl Passenger {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Fields only one gateway asks for, kept off the base card record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardExtension {
    #[default]
    None,
    /// Transbank authenticates the cardholder with RUT and bank password.
    Webpay { rut: String, password: String },
    /// Mercado Pago wants the document and an installment choice besides
    /// the card itself.
    MercadoPago {
        document_type: String,
        document_number: String,
        email: Option<String>,
        installments_label: String,
    },
    /// Cielo optionally picks credit/debit and answers a 3-D Secure
    /// challenge with a preconfigured code.
    Cielo {
        card_kind: Option<String>,
        challenge_code: Option<String>,
    },
}

/// Test card the selected gateway types into its form. `extension` carries
/// the market-specific fields; anything nobody modeled yet rides along in
/// `extra` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub number: String,
    /// As printed on the card, `MM/YY`.
    pub expiry: String,
    pub cvv: String,
    #[serde(default)]
    pub holder: Option<String>,
    #[serde(default)]
    pub extension: CardExtension,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl CardDetails {
    /// Expiry with the separator stripped, the way keyboard-driven gateway
    /// fields want it (`12/30` becomes `1230`).
    pub fn expiry_digits(&self) -> String {
        self.expiry.chars().filter(char::is_ascii_digit).collect()
    }

    /// Last four digits only, safe for logs.
    pub fn masked_number(&self) -> String {
        let digits: Vec<char> = self.number.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 4 {
            return "****".to_string();
        }
        let tail: String = digits[digits.len() - 4..].iter().collect();
        format!("**** {tail}")
    }

    /// A gateway must never start typing with an incomplete card.
    pub fn ensure_complete(&self) -> Result<(), String> {
        if self.number.trim().is_empty() {
            return Err("card number is empty".to_string());
        }
        if self.expiry.trim().is_empty() {
            return Err("card expiry is empty".to_string());
        }
        if self.cvv.trim().is_empty() {
            return Err("card cvv is empty".to_string());
        }
        Ok(())
    }
}

/// Ordered phases of the purchase. Transitions are strictly forward; a
/// stage is never revisited once passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    FareSelection,
    PassengerData,
    Checkout,
    Payment,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Search,
        Stage::FareSelection,
        Stage::PassengerData,
        Stage::Checkout,
        Stage::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::FareSelection => "fare_selection",
            Stage::PassengerData => "passenger_data",
            Stage::Checkout => "checkout",
            Stage::Payment => "payment",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Search => Some(Stage::FareSelection),
            Stage::FareSelection => Some(Stage::PassengerData),
            Stage::PassengerData => Some(Stage::Checkout),
            Stage::Checkout => Some(Stage::Payment),
            Stage::Payment => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(Stage::Search),
            "fare_selection" | "fare-selection" | "fares" => Ok(Stage::FareSelection),
            "passenger_data" | "passenger-data" | "passengers" => Ok(Stage::PassengerData),
            "checkout" => Ok(Stage::Checkout),
            "payment" => Ok(Stage::Payment),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Everything one run needs, resolved up front. Built once by the caller
/// and never mutated while the flow is driving the browser.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub market: Market,
    pub url: String,
    pub trip_type: TripType,
    pub origin: String,
    pub destination: String,
    /// Calendar offset of the outbound date, clamped to available days.
    pub days_ahead: u32,
    /// Round trip only: days between outbound and return.
    pub return_offset: u32,
    pub seats: SeatCounts,
    /// Pause after completing this stage and hand the page to an operator.
    pub checkpoint: Option<Stage>,
    /// Capture UI inventories and screenshots at every step.
    pub exploration: bool,
    /// Stop right after the search stage. Implies `exploration`.
    pub exploration_only: bool,
    /// Settling pause before typing into freshly rendered gateway fields.
    pub safety_pause: Duration,
    /// Extra delay after each probe action, for watching a headful run.
    pub action_delay: Duration,
    /// Wait before the final success screenshot, so the confirmation page
    /// can finish whatever it is doing.
    pub success_cooldown: Duration,
    pub card: CardDetails,
}

impl RunConfig {
    pub fn payment_method(&self) -> &'static str {
        self.market.gateway_label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_round_trips_through_str() {
        for market in Market::ALL {
            assert_eq!(market.as_str().parse::<Market>().unwrap(), market);
        }
        assert_eq!("cl".parse::<Market>().unwrap(), Market::Cl);
        assert!("XX".parse::<Market>().is_err());
    }

    #[test]
    fn trip_type_accepts_synonyms() {
        for raw in ["OW", "oneway", "ONE_WAY", "solo_ida", "one-way"] {
            assert_eq!(raw.parse::<TripType>().unwrap(), TripType::OneWay);
        }
        for raw in ["RT", "roundtrip", "ROUND_TRIP", "ida_y_vuelta"] {
            assert_eq!(raw.parse::<TripType>().unwrap(), TripType::RoundTrip);
        }
        assert!("sideways".parse::<TripType>().is_err());
    }

    #[test]
    fn seat_counts_validation() {
        assert!(SeatCounts { adults: 2, children: 1, infants: 2 }.validate().is_ok());
        assert!(SeatCounts { adults: 1, children: 0, infants: 2 }.validate().is_err());
        assert!(SeatCounts { adults: 0, children: 1, infants: 0 }.validate().is_err());
        assert_eq!(SeatCounts::default().total(), 1);
    }

    #[test]
    fn stage_order_is_total_and_forward() {
        let mut stage = Stage::Search;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, Stage::ALL);
        assert_eq!(stage, Stage::Payment);
    }

    #[test]
    fn stage_parses_own_name() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("boarding".parse::<Stage>().is_err());
    }

    #[test]
    fn expiry_digits_strips_separator() {
        let card = CardDetails {
            number: "4051885600446623".to_string(),
            expiry: "12/30".to_string(),
            cvv: "123".to_string(),
            holder: None,
            extension: CardExtension::None,
            extra: BTreeMap::new(),
        };
        assert_eq!(card.expiry_digits(), "1230");
        assert_eq!(card.masked_number(), "**** 6623");
        assert!(card.ensure_complete().is_ok());
    }

    #[test]
    fn incomplete_card_is_rejected() {
        let card = CardDetails {
            number: "4051885600446623".to_string(),
            expiry: String::new(),
            cvv: "123".to_string(),
            holder: None,
            extension: CardExtension::None,
            extra: BTreeMap::new(),
        };
        assert!(card.ensure_complete().is_err());
    }
}

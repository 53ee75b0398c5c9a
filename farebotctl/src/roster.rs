//! Expands the configured contact identity into the full passenger roster.
//!
//! The storefront rejects duplicate travelers, so every seat past the first
//! gets letter-suffixed names, a numbered email alias, and a numbered
//! document. Children and infants additionally get placeholder names and a
//! birth date that puts them in the right fare bracket.

use chrono::{Datelike, Local, NaiveDate};
use farebot_core::{ContactSection, Passenger, PassengerCategory, SeatCounts};

/// Builds the ordered roster: adults first, then children, then infants.
/// The first entry keeps the contact's identity untouched and doubles as
/// the reservation contact downstream.
pub fn build_roster(contact: &ContactSection, seats: &SeatCounts) -> Vec<Passenger> {
    let today = Local::now().date_naive();
    roster_for_date(contact, seats, today)
}

fn roster_for_date(
    contact: &ContactSection,
    seats: &SeatCounts,
    today: NaiveDate,
) -> Vec<Passenger> {
    let groups = [
        (PassengerCategory::Adult, seats.adults),
        (PassengerCategory::Child, seats.children),
        (PassengerCategory::Infant, seats.infants),
    ];

    let mut roster = Vec::with_capacity(seats.total() as usize);
    for (category, count) in groups {
        for slot in 1..=count as usize {
            let position = roster.len() + 1;
            roster.push(roster_member(contact, category, position, slot, today));
        }
    }
    roster
}

fn roster_member(
    contact: &ContactSection,
    category: PassengerCategory,
    position: usize,
    slot: usize,
    today: NaiveDate,
) -> Passenger {
    let mut passenger = Passenger {
        category,
        first_name: contact.first_name.clone(),
        last_name: contact.last_name.clone(),
        birth_date: contact.birth_date,
        document_type: contact.document_type.clone(),
        document_number: contact.document_number.clone(),
        gender: contact.gender.clone(),
        issue_country: contact.issue_country.clone(),
        email: contact.email.clone(),
        phone_prefix: contact.phone_prefix.clone(),
        phone: contact.phone.clone(),
    };

    if position > 1 {
        let suffix = letter_suffix(position);
        passenger.first_name = format!("{} {}", contact.first_name, suffix);
        passenger.last_name = format!("{} {}", contact.last_name, suffix);
        passenger.email = email_alias(&contact.email, position);
        passenger.document_number = format!("{}{}", contact.document_number, position);
    }

    match category {
        PassengerCategory::Adult => {}
        PassengerCategory::Child => {
            passenger.first_name = format!("Nino {}", letter_suffix(slot));
            passenger.birth_date = years_ago(today, 10);
        }
        PassengerCategory::Infant => {
            passenger.first_name = format!("Infante {}", letter_suffix(slot));
            passenger.birth_date = years_ago(today, 1);
        }
    }

    passenger
}

/// 1 -> A, 2 -> B, ..., 26 -> Z, 27 -> AA.
fn letter_suffix(index: usize) -> String {
    let mut value = index.max(1);
    let mut letters = Vec::new();
    while value > 0 {
        let rest = (value - 1) % 26;
        value = (value - 1) / 26;
        letters.push((b'A' + rest as u8) as char);
    }
    letters.iter().rev().collect()
}

/// Numbers the user part so aliases land in the same mailbox.
fn email_alias(base: &str, index: usize) -> String {
    match base.split_once('@') {
        Some((user, domain)) => format!("{user}{index}@{domain}"),
        None => format!("{base}{index}"),
    }
}

/// Same calendar day `years` back; Feb 29 collapses to Feb 28 when the
/// target year is not a leap year.
fn years_ago(today: NaiveDate, years: i32) -> NaiveDate {
    let year = today.year() - years;
    today
        .with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, 2, 28))
        .unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ContactSection {
        ContactSection {
            first_name: "Juan".to_string(),
            last_name: "Prueba".to_string(),
            email: "juan.prueba@example.com".to_string(),
            document_type: "DNI".to_string(),
            document_number: "12345678".to_string(),
            gender: "Masculino".to_string(),
            issue_country: "Chile".to_string(),
            phone_prefix: "+56".to_string(),
            phone: "987654321".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 5, 14).unwrap(),
        }
    }

    fn seats(adults: u32, children: u32, infants: u32) -> SeatCounts {
        SeatCounts {
            adults,
            children,
            infants,
        }
    }

    #[test]
    fn letter_suffix_wraps_like_spreadsheet_columns() {
        assert_eq!(letter_suffix(1), "A");
        assert_eq!(letter_suffix(2), "B");
        assert_eq!(letter_suffix(26), "Z");
        assert_eq!(letter_suffix(27), "AA");
        assert_eq!(letter_suffix(52), "AZ");
        assert_eq!(letter_suffix(53), "BA");
    }

    #[test]
    fn email_alias_numbers_the_user_part() {
        assert_eq!(
            email_alias("juan.prueba@example.com", 2),
            "juan.prueba2@example.com"
        );
        assert_eq!(email_alias("not-an-email", 3), "not-an-email3");
    }

    #[test]
    fn years_ago_handles_leap_day() {
        let leap = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            years_ago(leap, 1),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap()
        );
        assert_eq!(
            years_ago(leap, 4),
            NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()
        );

        let plain = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(
            years_ago(plain, 10),
            NaiveDate::from_ymd_opt(2016, 3, 15).unwrap()
        );
    }

    #[test]
    fn single_adult_keeps_contact_identity() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();
        let roster = roster_for_date(&contact(), &seats(1, 0, 0), today);

        assert_eq!(roster.len(), 1);
        let lead = &roster[0];
        assert_eq!(lead.category, PassengerCategory::Adult);
        assert_eq!(lead.first_name, "Juan");
        assert_eq!(lead.last_name, "Prueba");
        assert_eq!(lead.email, "juan.prueba@example.com");
        assert_eq!(lead.document_number, "12345678");
        assert_eq!(lead.birth_date, contact().birth_date);
    }

    #[test]
    fn roster_orders_adults_children_infants() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();
        let roster = roster_for_date(&contact(), &seats(2, 1, 1), today);

        let categories: Vec<_> = roster.iter().map(|p| p.category).collect();
        assert_eq!(
            categories,
            vec![
                PassengerCategory::Adult,
                PassengerCategory::Adult,
                PassengerCategory::Child,
                PassengerCategory::Infant,
            ]
        );
    }

    #[test]
    fn extra_seats_get_unique_identities() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();
        let roster = roster_for_date(&contact(), &seats(2, 1, 1), today);

        let second = &roster[1];
        assert_eq!(second.first_name, "Juan B");
        assert_eq!(second.last_name, "Prueba B");
        assert_eq!(second.email, "juan.prueba2@example.com");
        assert_eq!(second.document_number, "123456782");

        // Children keep the positional surname but get a placeholder name
        // and a ten-year-old birth date.
        let child = &roster[2];
        assert_eq!(child.first_name, "Nino A");
        assert_eq!(child.last_name, "Prueba C");
        assert_eq!(child.document_number, "123456783");
        assert_eq!(child.birth_date, NaiveDate::from_ymd_opt(2016, 8, 25).unwrap());

        let infant = &roster[3];
        assert_eq!(infant.first_name, "Infante A");
        assert_eq!(infant.birth_date, NaiveDate::from_ymd_opt(2025, 8, 25).unwrap());
    }
}

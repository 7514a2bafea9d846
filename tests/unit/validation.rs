//! Completeness rules for raw records

use lead_harvester::harvest::SearchTask;
use lead_harvester::postal::PostalCode;
use lead_harvester::validator::{RecordValidator, Rejection};
use lead_harvester::RawPlaceRecord;

fn task() -> SearchTask {
    SearchTask::new("Dental offices in {}", PostalCode::parse("N2J 4Z2").unwrap())
}

fn named(name: &str) -> RawPlaceRecord {
    RawPlaceRecord {
        name: name.to_string(),
        ..Default::default()
    }
}

#[test]
fn test_empty_name_always_rejected() {
    let validator = RecordValidator::new();
    let raw = RawPlaceRecord {
        name: "  ".to_string(),
        address: Some("1 King St".to_string()),
        phone: Some("519-555-0100".to_string()),
        website: Some("https://dental.ca".to_string()),
        ..Default::default()
    };
    assert_eq!(
        validator.validate_with_reason(raw, &task()),
        Err(Rejection::MissingName)
    );
}

#[test]
fn test_name_without_any_contact_path_rejected() {
    let validator = RecordValidator::new();
    let mut raw = named("Bright Smiles");
    raw.address = Some(" ".to_string());
    raw.phone = Some(String::new());
    assert_eq!(
        validator.validate_with_reason(raw, &task()),
        Err(Rejection::NoContactPath)
    );
}

#[test]
fn test_any_single_contact_path_is_enough() {
    let validator = RecordValidator::new();
    for field in ["address", "phone", "website"] {
        let mut raw = named("Bright Smiles");
        let value = Some("x 1".to_string());
        match field {
            "address" => raw.address = value,
            "phone" => raw.phone = Some("519-555-0100".to_string()),
            _ => raw.website = value,
        }
        assert!(
            validator.validate(raw, &task()).is_some(),
            "{field} alone should be accepted"
        );
    }
}

#[test]
fn test_placeholder_names_rejected() {
    let validator = RecordValidator::new();
    for name in ["Test Business", "Example Dental", "Lorem Ipsum Clinic"] {
        let mut raw = named(name);
        raw.phone = Some("519-555-0100".to_string());
        assert_eq!(
            validator.validate_with_reason(raw, &task()),
            Err(Rejection::PlaceholderName),
            "{name}"
        );
    }

    // whole words only
    for name in ["Testa Family Dentistry", "Contest Bakery", "Counterexample Labs"] {
        let mut raw = named(name);
        raw.phone = Some("519-555-0100".to_string());
        assert!(validator.validate(raw, &task()).is_some(), "{name}");
    }
}

#[test]
fn test_lead_carries_provenance_and_normalized_fields() {
    let validator = RecordValidator::new();
    let raw = RawPlaceRecord {
        place_id: Some("abc".to_string()),
        name: " Bright Smiles ".to_string(),
        address: Some("1   King St N,\n Waterloo".to_string()),
        phone: Some("(519) 555-0100".to_string()),
        status: Some("operational".to_string()),
        categories: vec!["dentist".to_string(), "health".to_string()],
        ..Default::default()
    };

    let lead = validator.validate(raw, &task()).unwrap();
    assert_eq!(lead.name, "Bright Smiles");
    assert_eq!(lead.address.as_deref(), Some("1 King St N, Waterloo"));
    assert_eq!(lead.phone.as_deref(), Some("+1 519-555-0100"));
    assert_eq!(lead.business_status.as_deref(), Some("OPERATIONAL"));
    assert_eq!(lead.primary_type, "dentist");
    assert_eq!(lead.all_types, vec!["dentist", "health"]);
    assert_eq!(lead.search_query, "Dental offices in N2J 4Z2");
    assert_eq!(lead.search_location, "N2J 4Z2");
    assert_eq!(lead.place_id.as_deref(), Some("abc"));
}

#[test]
fn test_custom_placeholder_patterns() {
    let validator = RecordValidator::with_placeholder_patterns([r"(?i)^closed\b"]).unwrap();
    let mut raw = named("Closed Dental");
    raw.phone = Some("519-555-0100".to_string());
    assert_eq!(validator.check(&raw), Err(Rejection::PlaceholderName));

    let mut raw = named("Test Dental");
    raw.phone = Some("519-555-0100".to_string());
    assert!(validator.check(&raw).is_ok());
}

#[test]
fn test_phone_without_digits_is_not_a_contact_path() {
    let validator = RecordValidator::new();
    for phone in ["n/a", "call us", "--"] {
        let mut raw = named("Acme Dental");
        raw.phone = Some(phone.to_string());
        assert_eq!(
            validator.validate_with_reason(raw, &task()),
            Err(Rejection::NoContactPath),
            "{phone}"
        );
    }

    let mut raw = named("Acme Dental");
    raw.phone = Some("n/a".to_string());
    raw.website = Some("https://acme.example".to_string());
    let lead = validator.validate(raw, &task()).unwrap();
    assert_eq!(lead.phone, None);
    assert!(lead.website.is_some());
}

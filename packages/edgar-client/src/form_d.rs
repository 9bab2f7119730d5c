//! Form D `primary_doc.xml` parsing.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{EdgarError, Result};
use crate::types::FormD;

/// Parse a Form D primary document.
///
/// Only `edgarSubmission` documents are accepted. Unknown elements are ignored.
pub fn parse_form_d(xml: &str) -> Result<FormD> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut form = FormD::default();
    let mut path: Vec<String> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() && name == "edgarSubmission" {
                    saw_root = true;
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| EdgarError::Xml(e.to_string()))?
                    .into_owned();
                apply_field(&mut form, &path, text.trim());
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EdgarError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(EdgarError::Xml("missing edgarSubmission root".into()));
    }
    Ok(form)
}

fn apply_field(form: &mut FormD, path: &[String], text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(leaf) = path.last().map(String::as_str) else {
        return;
    };
    let parent = path.len().checked_sub(2).map(|i| path[i].as_str());

    match (parent, leaf) {
        (Some("primaryIssuer"), "entityName") => form.issuer_name = Some(text.to_string()),
        (Some("primaryIssuer"), "cik") => form.issuer_cik = Some(text.to_string()),
        (Some("industryGroup"), "industryGroupType") => {
            form.industry_group = Some(text.to_string())
        }
        (Some("newOrAmendment"), "isAmendment") => {
            form.is_amendment = text.eq_ignore_ascii_case("true")
        }
        (Some("dateOfFirstSale"), "value") => form.date_of_first_sale = Some(text.to_string()),
        (Some("offeringSalesAmounts"), "totalOfferingAmount") => {
            form.total_offering_amount = parse_amount(text)
        }
        (Some("offeringSalesAmounts"), "totalAmountSold") => {
            form.total_amount_sold = parse_amount(text)
        }
        (Some("offeringSalesAmounts"), "totalRemaining") => {
            form.total_remaining = parse_amount(text)
        }
        (Some("investors"), "totalNumberAlreadyInvested") => {
            form.investor_count = text.parse().ok()
        }
        _ => {}
    }
}

/// Dollar amounts; "Indefinite" and anything non-numeric become `None`.
fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != ',' && *c != '$').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<edgarSubmission>
  <schemaVersion>X0708</schemaVersion>
  <primaryIssuer>
    <cik>0001234567</cik>
    <entityName>Acme Robotics, Inc.</entityName>
  </primaryIssuer>
  <offeringData>
    <industryGroup><industryGroupType>Other Technology</industryGroupType></industryGroup>
    <typeOfFiling>
      <newOrAmendment><isAmendment>false</isAmendment></newOrAmendment>
      <dateOfFirstSale><value>2024-02-27</value></dateOfFirstSale>
    </typeOfFiling>
    <offeringSalesAmounts>
      <totalOfferingAmount>5000000</totalOfferingAmount>
      <totalAmountSold>4750000</totalAmountSold>
      <totalRemaining>250000</totalRemaining>
    </offeringSalesAmounts>
    <investors><totalNumberAlreadyInvested>14</totalNumberAlreadyInvested></investors>
  </offeringData>
</edgarSubmission>"#;

    #[test]
    fn parses_offering_fields() {
        let form = parse_form_d(SAMPLE).unwrap();
        assert_eq!(form.issuer_name.as_deref(), Some("Acme Robotics, Inc."));
        assert_eq!(form.issuer_cik.as_deref(), Some("0001234567"));
        assert_eq!(form.industry_group.as_deref(), Some("Other Technology"));
        assert!(!form.is_amendment);
        assert_eq!(form.date_of_first_sale.as_deref(), Some("2024-02-27"));
        assert_eq!(form.total_offering_amount, Some(5_000_000.0));
        assert_eq!(form.total_amount_sold, Some(4_750_000.0));
        assert_eq!(form.investor_count, Some(14));
    }

    #[test]
    fn indefinite_offering_amount_is_none() {
        let xml = SAMPLE.replace(
            "<totalOfferingAmount>5000000</totalOfferingAmount>",
            "<totalOfferingAmount>Indefinite</totalOfferingAmount>",
        );
        let form = parse_form_d(&xml).unwrap();
        assert_eq!(form.total_offering_amount, None);
        assert_eq!(form.total_amount_sold, Some(4_750_000.0));
    }

    #[test]
    fn rejects_non_form_d_documents() {
        assert!(matches!(
            parse_form_d("<html><body>nope</body></html>"),
            Err(EdgarError::Xml(_))
        ));
    }

    #[test]
    fn amount_parsing_strips_separators() {
        assert_eq!(parse_amount("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_amount("n/a"), None);
    }
}

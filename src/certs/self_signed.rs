//! Locally generated CA and serving certificate

use super::{CertError, CertMaterial};
use chrono::{Datelike, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use zeroize::Zeroizing;

/// Today as (year, month, day). The day is clamped so the same date exists
/// in every month.
fn today() -> (i32, u8, u8) {
    let today = Utc::now().date_naive();
    (today.year(), today.month() as u8, today.day().min(28) as u8)
}

/// Generate a CA and a serving certificate for `fqdn` signed by it.
/// The CA certificate becomes the published bundle.
pub fn generate_self_signed(fqdn: &str, validity_years: i32) -> Result<CertMaterial, CertError> {
    let (year, month, day) = today();
    let not_before = rcgen::date_time_ymd(year, month, day);
    let not_after = rcgen::date_time_ymd(year + validity_years, month, day);

    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params
        .distinguished_name
        .push(DnType::CommonName, format!("{fqdn} CA"));
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;

    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params.self_signed(&ca_key)?;
    let ca_pem = ca_cert.pem();

    let mut params = CertificateParams::new(vec![fqdn.to_string()])?;
    params.distinguished_name.push(DnType::CommonName, fqdn);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate()?;
    let issuer = Issuer::from_ca_cert_pem(&ca_pem, &ca_key)?;
    let cert = params.signed_by(&key, &issuer)?;

    Ok(CertMaterial {
        cert_pem: cert.pem(),
        key_pem: Zeroizing::new(key.serialize_pem()),
        ca_bundle: ca_pem.into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn parse(pem_text: &str) -> Vec<u8> {
        ::pem::parse(pem_text).unwrap().contents().to_vec()
    }

    #[test]
    fn test_generated_material_is_valid() {
        let material = generate_self_signed("operator.ns.svc", 10).unwrap();
        material.validate().unwrap();
    }

    #[test]
    fn test_leaf_is_issued_by_ca_for_fqdn() {
        let material = generate_self_signed("operator.ns.svc", 10).unwrap();

        let leaf_der = parse(&material.cert_pem);
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
        let ca_der = parse(std::str::from_utf8(&material.ca_bundle).unwrap());
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();

        assert_eq!(leaf.issuer(), ca.subject());
        assert!(ca.is_ca());
        assert!(!leaf.is_ca());

        let san = leaf.subject_alternative_name().unwrap().unwrap();
        assert!(san
            .value
            .general_names
            .iter()
            .any(|name| matches!(name, GeneralName::DNSName("operator.ns.svc"))));
    }

    #[test]
    fn test_validity_spans_requested_years() {
        let material = generate_self_signed("operator.ns.svc", 10).unwrap();
        let der = parse(&material.cert_pem);
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let span = cert.validity().not_after.timestamp() - cert.validity().not_before.timestamp();
        let years = span / (365 * 24 * 3600);
        assert!((9..=10).contains(&years), "unexpected validity: {years} years");
    }
}

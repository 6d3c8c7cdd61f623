use biodedup::{HashFunction, Modality};

/// Version banner plus the supported pipeline options
pub fn banner() -> String {
    let modalities = [Modality::Face, Modality::Voice, Modality::Behavioral]
        .iter()
        .map(Modality::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let digests = [HashFunction::Sha256, HashFunction::Sha384, HashFunction::Sha512]
        .iter()
        .map(HashFunction::name)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "biodedup {}\nmodalities: {}\nfingerprint digests: {}",
        env!("CARGO_PKG_VERSION"),
        modalities,
        digests
    )
}

pub fn execute() {
    println!("{}", banner());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_lists_options() {
        let banner = banner();
        assert!(banner.starts_with("biodedup "));
        assert!(banner.contains("face, voice, behavioral"));
        assert!(banner.contains("sha256, sha384, sha512"));
    }
}

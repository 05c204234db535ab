#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Zip,
    TarGz,
    Tar,
}

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const USTAR_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";

impl ArchiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::Tar => "tar",
        }
    }

    pub fn download_extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::Tar => "tar",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "zip" => Some(Self::Zip),
            "tar.gz" | "tgz" => Some(Self::TarGz),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }

    /// Guess the archive type from a package reference's file name,
    /// ignoring any query string or fragment.
    pub fn infer_from_reference(reference: &str) -> Option<Self> {
        let lower = reference.to_ascii_lowercase();
        let without_fragment = lower.split('#').next().unwrap_or(&lower);
        let without_query = without_fragment
            .split('?')
            .next()
            .unwrap_or(without_fragment);

        if without_query.ends_with(".zip") {
            return Some(Self::Zip);
        }
        if without_query.ends_with(".tar.gz") || without_query.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        if without_query.ends_with(".tar") {
            return Some(Self::Tar);
        }
        None
    }

    /// Identify an archive from its leading bytes. The reference name is
    /// not trusted: registries routinely serve zips from extensionless URLs.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(ZIP_LOCAL_HEADER) || header.starts_with(ZIP_EMPTY_ARCHIVE) {
            return Some(Self::Zip);
        }
        if header.starts_with(GZIP_MAGIC) {
            return Some(Self::TarGz);
        }
        if header.len() >= USTAR_OFFSET + USTAR_MAGIC.len()
            && &header[USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()] == USTAR_MAGIC
        {
            return Some(Self::Tar);
        }
        None
    }
}

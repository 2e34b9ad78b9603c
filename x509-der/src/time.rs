// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UTCTime and GeneralizedTime decoding.

use {
    crate::{
        der::{DerObject, Tag},
        X509DerError as Error,
    },
    chrono::{DateTime, NaiveDate, TimeZone, Utc},
    std::str::FromStr,
};

/// Decode a Time value (UTCTime or GeneralizedTime) from a DER object.
pub fn parse_time(obj: &DerObject) -> Result<DateTime<Utc>, Error> {
    match obj.tag() {
        Tag::UTC_TIME => parse_utc_time(obj.primitive_bytes()?),
        Tag::GENERALIZED_TIME => parse_generalized_time(obj.primitive_bytes()?),
        other => Err(Error::malformed(format!(
            "expected UTCTime or GeneralizedTime, found {:?}",
            other
        ))),
    }
}

/// Parse UTCTime string data (`YYMMDDHHMMSSZ`).
///
/// Two-digit years pivot at 50: 50..99 map to 19xx, 00..49 to 20xx.
pub fn parse_utc_time(data: &[u8]) -> Result<DateTime<Utc>, Error> {
    if data.len() != "YYMMDDHHMMSSZ".len() {
        return Err(Error::malformed("UTCTime has unexpected length"));
    }
    if data[12] != b'Z' {
        return Err(Error::malformed("UTCTime must be zulu"));
    }

    let year = digits(&data[0..2])? as i32;
    let year = if year >= 50 { year + 1900 } else { year + 2000 };

    assemble(year, &data[2..12])
}

/// Parse GeneralizedTime string data (`YYYYMMDDHHMMSSZ`).
///
/// Fractional seconds and timezone offsets are not supported; X.509
/// requires zulu time without fractions.
pub fn parse_generalized_time(data: &[u8]) -> Result<DateTime<Utc>, Error> {
    if data.len() != "YYYYMMDDHHMMSSZ".len() {
        return Err(Error::malformed("GeneralizedTime has unexpected length"));
    }
    if data[14] != b'Z' {
        return Err(Error::malformed("GeneralizedTime must be zulu"));
    }

    let year = digits(&data[0..4])? as i32;

    assemble(year, &data[4..14])
}

fn assemble(year: i32, rest: &[u8]) -> Result<DateTime<Utc>, Error> {
    let month = digits(&rest[0..2])?;
    let day = digits(&rest[2..4])?;
    let hour = digits(&rest[4..6])?;
    let minute = digits(&rest[6..8])?;
    let second = digits(&rest[8..10])?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| Error::malformed("time fields out of range"))
}

fn digits(data: &[u8]) -> Result<u32, Error> {
    let text =
        std::str::from_utf8(data).map_err(|_| Error::malformed("time field is not ASCII"))?;

    u32::from_str(text).map_err(|_| Error::malformed("time field is not numeric"))
}

#[cfg(test)]
mod test {
    use {super::*, chrono::Datelike, chrono::Timelike};

    #[test]
    fn generalized_time() {
        let t = parse_generalized_time(b"20220129133742Z").unwrap();
        assert_eq!(t.year(), 2022);
        assert_eq!(t.month(), 1);
        assert_eq!(t.day(), 29);
        assert_eq!(t.hour(), 13);
        assert_eq!(t.minute(), 37);
        assert_eq!(t.second(), 42);
    }

    #[test]
    fn generalized_time_invalid() {
        assert!(parse_generalized_time(b"").is_err());
        assert!(parse_generalized_time(b"abcd").is_err());
        assert!(parse_generalized_time(b"20220130123015").is_err());
        assert!(parse_generalized_time(b"20220130123015a").is_err());
        assert!(parse_generalized_time(b"20220129133742.333Z").is_err());
        assert!(parse_generalized_time(b"20220129133742-0800").is_err());
        assert!(parse_generalized_time(b"20221329133742Z").is_err());
    }

    #[test]
    fn utc_time_pivot() {
        assert_eq!(parse_utc_time(b"990101000000Z").unwrap().year(), 1999);
        assert_eq!(parse_utc_time(b"500101000000Z").unwrap().year(), 1950);
        assert_eq!(parse_utc_time(b"490101000000Z").unwrap().year(), 2049);
        assert_eq!(parse_utc_time(b"000101000000Z").unwrap().year(), 2000);
    }

    #[test]
    fn utc_time_invalid() {
        assert!(parse_utc_time(b"9901010000Z").is_err());
        assert!(parse_utc_time(b"990101000000").is_err());
        assert!(parse_utc_time(b"990132000000Z").is_err());
    }

    #[test]
    fn tagged_dispatch() {
        let utc = DerObject::primitive(Tag::UTC_TIME, b"220129133742Z".to_vec());
        assert_eq!(parse_time(&utc).unwrap().year(), 2022);

        let general = DerObject::primitive(Tag::GENERALIZED_TIME, b"20220129133742Z".to_vec());
        assert_eq!(parse_time(&general).unwrap().year(), 2022);

        let wrong = DerObject::integer(3);
        assert!(parse_time(&wrong).is_err());
    }
}

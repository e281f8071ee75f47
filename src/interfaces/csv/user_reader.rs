use super::UserRecord;
use crate::error::{PaymentError, Result};
use std::io::Read;

/// Reads user rows from a CSV source.
///
/// Fields are trimmed, so `basic, 4.0` and `basic,4.0` parse the same. Rows
/// are deserialized lazily, one at a time.
pub struct UserReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> UserReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    pub fn records(self) -> impl Iterator<Item = Result<UserRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::user::{Grade, UserStatus};
    use rust_decimal_macros::dec;

    const HEADER: &str = "uid,name,email,phone,status,grade,fee_rate,is_grade_manual,monthly_limit,used_amount,last_month_payment_amount";

    #[test]
    fn test_reads_rows() {
        let data = format!(
            "{HEADER}\nu1, Kim, kim@example.com, 01012345678, active, basic, 4.0, false, 10000000, 12000000, 0\nu2, Lee,, 01000000000, suspended, b2b, 3.0, true, 100000000, 0, 0"
        );
        let records: Vec<UserRecord> = UserReader::new(data.as_bytes())
            .records()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].grade, Grade::Basic);
        assert_eq!(records[0].used_amount, Money::new(dec!(12000000)));
        assert_eq!(records[1].email, None);
        assert_eq!(records[1].status, UserStatus::Suspended);
        assert!(records[1].is_grade_manual);
    }

    #[test]
    fn test_unknown_grade_is_an_error() {
        let data = format!("{HEADER}\nu1,Kim,,010,active,gold,4.0,false,1,0,0");
        let results: Vec<Result<UserRecord>> = UserReader::new(data.as_bytes()).records().collect();
        assert!(results[0].is_err());
    }

    #[test]
    fn test_out_of_range_fee_rate_is_an_error() {
        let data = format!("{HEADER}\nu1,Kim,,010,active,basic,140,false,1,0,0");
        let results: Vec<Result<UserRecord>> = UserReader::new(data.as_bytes()).records().collect();
        assert!(results[0].is_err());
    }
}

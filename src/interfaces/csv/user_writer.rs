use super::UserRecord;
use crate::domain::user::User;
use crate::error::Result;
use std::io::Write;

/// Writes users as CSV rows with a header.
pub struct UserWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> UserWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_users<'a>(&mut self, users: impl IntoIterator<Item = &'a User>) -> Result<()> {
        for user in users {
            self.writer.serialize(UserRecord::from(user))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::GradeSettings;
    use crate::domain::user::Grade;
    use chrono::Utc;

    #[test]
    fn test_writes_header_and_rows() {
        let user = User::new(
            "u1",
            "Kim",
            None,
            "01012345678",
            Grade::Platinum,
            GradeSettings::default().platinum,
            Utc::now(),
        );
        let mut out = Vec::new();
        UserWriter::new(&mut out).write_users([&user]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("uid,name,email,phone,status,grade,fee_rate,is_grade_manual,monthly_limit,used_amount,last_month_payment_amount")
        );
        assert_eq!(
            lines.next(),
            Some("u1,Kim,,01012345678,active,platinum,3.5,false,30000000,0,0")
        );
    }
}

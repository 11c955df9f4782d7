/// A modification time as packed into a directory entry.
///
/// The date word holds the year since 1980 in bits 9-15, the month in 5-8 and
/// the day in 0-4. The time word holds hours in 11-15 and minutes in 5-10.
/// Seconds are not shown so they are not decoded.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

impl FatTimestamp {
    const MONTHS: [&'static str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    pub fn from_fat(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    pub fn year(&self) -> u16 {
        ((self.date >> 9) & 0x7F) + 1980
    }

    pub fn month(&self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub fn day(&self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hour(&self) -> u8 {
        ((self.time >> 11) & 0x1F) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    /// Month and day are in range. Hour and minute are shown as stored.
    pub fn is_valid(&self) -> bool {
        (1..=12).contains(&self.month()) && (1..=31).contains(&self.day())
    }

    pub fn month_name(&self) -> Option<&'static str> {
        Self::MONTHS.get(usize::from(self.month()).checked_sub(1)?).copied()
    }
}

impl core::fmt::Display for FatTimestamp {
    /// `Mon dd hh:mm`, as `ls -l` shows recent files.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.month_name() {
            Some(month) if self.is_valid() => write!(
                f,
                "{} {:2} {:02}:{:02}",
                month,
                self.day(),
                self.hour(),
                self.minute()
            ),
            _ => f.write_str("??? ?? ??:??"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pack(year: u16, month: u16, day: u16, hour: u16, minute: u16) -> FatTimestamp {
        FatTimestamp::from_fat(
            ((year - 1980) << 9) | (month << 5) | day,
            (hour << 11) | (minute << 5),
        )
    }

    #[test]
    fn decode_fields() {
        let ts = pack(2023, 10, 15, 14, 30);
        assert_eq!(ts.year(), 2023);
        assert_eq!(ts.month(), 10);
        assert_eq!(ts.day(), 15);
        assert_eq!(ts.hour(), 14);
        assert_eq!(ts.minute(), 30);
        assert_eq!(format!("{}", ts), "Oct 15 14:30");
    }

    #[test]
    fn single_digit_day_is_padded() {
        assert_eq!(format!("{}", pack(1999, 1, 5, 9, 7)), "Jan  5 09:07");
    }

    #[test]
    fn invalid_dates() {
        assert_eq!(format!("{}", FatTimestamp::default()), "??? ?? ??:??");
        assert_eq!(format!("{}", pack(2000, 13, 1, 0, 0)), "??? ?? ??:??");
        assert_eq!(format!("{}", pack(2000, 2, 0, 0, 0)), "??? ?? ??:??");
    }
}

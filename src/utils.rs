use nom::number::complete::{be_u16, be_u32};
use nom::IResult;

pub struct Utils;

impl Utils {
    // {{{ nom helpers for scaled big-endian fields
    pub fn be_u16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, num) = be_u16(input)?;
        Ok((input, num as f64 / 10.0))
    }

    pub fn be_u16_div100(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, num) = be_u16(input)?;
        Ok((input, num as f64 / 100.0))
    }

    pub fn be_u16_div1000(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, num) = be_u16(input)?;
        Ok((input, num as f64 / 1000.0))
    }

    /// Trailing field that only some hardware generations send.
    pub fn be_u16_opt(input: &[u8]) -> IResult<&[u8], Option<u16>> {
        nom::combinator::opt(be_u16)(input)
    }

    pub fn be_u32_div10(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, num) = be_u32(input)?;
        Ok((input, num as f64 / 10.0))
    }
    // }}}

    /// Dotted uppercase hex, the way frames are usually written down by hand.
    pub fn hex_dump(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// ASCII field with NULs and padding stripped from both ends.
    pub fn ascii(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes)
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_formats_dotted() {
        assert_eq!(Utils::hex_dump(&[0xAA, 0x55, 0x01]), "AA.55.01");
        assert_eq!(Utils::hex_dump(&[]), "");
    }

    #[test]
    fn ascii_strips_padding() {
        assert_eq!(Utils::ascii(b"X1-1.1\0\0 "), "X1-1.1");
        assert_eq!(Utils::ascii(b"  1100\0\0"), "1100");
    }

    #[test]
    fn scaled_parsers() {
        let (_, v) = Utils::be_u16_div10(&[0x09, 0x21]).unwrap();
        assert_eq!(v, 233.7);
        let (_, v) = Utils::be_u16_div100(&[0x13, 0x87]).unwrap();
        assert_eq!(v, 49.99);
        let (rest, v) = Utils::be_u16_opt(&[0x01]).unwrap();
        assert_eq!((rest.len(), v), (1, None));
    }
}

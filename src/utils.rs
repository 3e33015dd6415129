/// Formats `start..=end` of the address space returned by `read`, 16 bytes a
/// line with an ASCII column.
pub fn hexdump(read: impl Fn(u16) -> u8, start: u16, end: u16) -> String {
    let mut out = String::new();
    let mut addr = start;
    loop {
        let mut line = format!("{:04x}: ", addr);
        let mut chars = String::new();
        let mut done = false;
        for _ in 0..16 {
            let byte = read(addr);
            line.push_str(&format!("{:02x} ", byte));
            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });

            if addr == end {
                done = true;
                break;
            }
            addr = addr.wrapping_add(1);
        }

        out.push_str(&format!("{:<54} {}\n", line, chars));
        if done {
            break;
        }
    }
    out
}

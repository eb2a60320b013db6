#![allow(bad_style)]

mod png;

/// Random bytes from the OS, for inputs that no decoder should panic on.
fn rand_bytes(count: usize) -> Vec<u8> {
  let mut buffer = vec![0; count];
  getrandom::getrandom(&mut buffer).unwrap();
  buffer
}

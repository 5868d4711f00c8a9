/// Largest `n` whose Fibonacci number fits in a `u64`.
pub const MAX_U64_INPUT: u32 = 93;

/// Computes the `n`th Fibonacci number with the naive doubly recursive
/// definition, where `F(1) = F(2) = 1` and `F(0) = 0`.
///
/// This runs in exponential time on purpose: it is the blocking workload of
/// the synchronous demo, and `fibonacci(40)` keeps a thread busy for a
/// noticeable moment.
///
/// # Example
/// ```
/// use async_wars::fibonacci;
/// assert_eq!(fibonacci::fibonacci(10), 55);
/// ```
pub fn fibonacci(n: u32) -> u64 {
    match n {
        0 => 0,
        1 | 2 => 1,
        _ => fibonacci(n - 1) + fibonacci(n - 2),
    }
}

/// Linear-time version of [`fibonacci`]. Returns `None` when the result does
/// not fit in a `u64` (n > [`MAX_U64_INPUT`]).
pub fn fibonacci_iterative(n: u32) -> Option<u64> {
    if n == 0 {
        return Some(0);
    }
    let mut a: u64 = 0;
    let mut b: u64 = 1;
    for _ in 1..n {
        let next = a.checked_add(b)?;
        a = b;
        b = next;
    }
    Some(b)
}

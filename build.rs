//! Compiles `poireau.d` into the `libpoireau` probe bindings consumed by
//! `src/probes.rs`. A no-op on targets without USDT/DTrace support; `usdt`
//! falls back to stub macros there, so the crate still builds.

fn main() {
    usdt::Builder::new("poireau.d")
        .build()
        .expect("failed to compile poireau.d USDT provider");
}

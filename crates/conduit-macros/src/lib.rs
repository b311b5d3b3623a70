//! Proc macros for conduit.
//!
//! These macros build the explicit dispatch schema of a target at compile
//! time, so the binder never has to guess at parameter names or kinds.
//!
//! ## Attribute Macros
//!
//! - [`macro@target`] - Describe an `impl` block as a dispatch target (`impl Target`)
//! - [`macro@callable`] - Wrap a free function as a hook [`Callable`] factory
//!
//! Both understand `#[param(name = "...", default = <expr>)]` on parameters.
//!
//! For working examples, see `conduit-dispatch/tests/macros.rs`.
//!
//! [`Callable`]: https://docs.rs/conduit-dispatch/latest/conduit_dispatch/struct.Callable.html

mod callable;
mod params;
mod target;

use proc_macro::TokenStream;

#[proc_macro_attribute]
pub fn target(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr = proc_macro2::TokenStream::from(attr);
    let item = proc_macro2::TokenStream::from(item);
    target::target_impl(attr, item)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

#[proc_macro_attribute]
pub fn callable(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr = proc_macro2::TokenStream::from(attr);
    let item = proc_macro2::TokenStream::from(item);
    callable::callable_impl(attr, item)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

//! Augment the testing of isolate executors with procedural macros.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, AttributeArgs, Ident, ItemFn, Lit, Meta, NestedMeta};

/// Levels accepted by [`macro@test_traced`].
const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Run a test with a `tracing-subscriber` fmt subscriber installed for its duration.
///
/// The subscriber writes through the test harness (so output is captured unless
/// `--nocapture` is passed) and filters at `level` (default `DEBUG`).
///
/// The subscriber is installed for the test's thread only. Threads spawned by the
/// test log to the global default subscriber (usually none).
///
/// The crate using this macro must depend on `tracing` and `tracing-subscriber`.
///
/// # Example
///
/// ```rust,ignore
/// use isolate_macros::test_traced;
///
/// #[test_traced(level = "INFO")]
/// fn test_lock() {
///     tracing::info!("entering isolate");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as AttributeArgs);
    let input = parse_macro_input!(item as ItemFn);

    // Parse arguments
    let mut level = String::from("DEBUG");
    for arg in args {
        match arg {
            NestedMeta::Meta(Meta::NameValue(pair)) if pair.path.is_ident("level") => {
                match pair.lit {
                    Lit::Str(lit) => level = lit.value().to_uppercase(),
                    other => {
                        return syn::Error::new_spanned(other, "level must be a string literal")
                            .to_compile_error()
                            .into();
                    }
                }
            }
            other => {
                return syn::Error::new_spanned(other, "unsupported argument, expected `level`")
                    .to_compile_error()
                    .into();
            }
        }
    }
    if !LEVELS.contains(&level.as_str()) {
        return syn::Error::new(
            Span::call_site(),
            format!("unknown level `{level}`, expected one of {LEVELS:?}"),
        )
        .to_compile_error()
        .into();
    }
    let level = Ident::new(&level, Span::call_site());

    // Wrap the test body
    let name = &input.sig.ident;
    let output = &input.sig.output;
    let attrs = &input.attrs;
    let vis = &input.vis;
    let block = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() #output {
            let subscriber = ::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(::tracing::Level::#level)
                .with_line_number(true)
                .finish();
            let dispatcher = ::tracing::Dispatch::new(subscriber);
            ::tracing::dispatcher::with_default(&dispatcher, || #block)
        }
    };
    TokenStream::from(expanded)
}

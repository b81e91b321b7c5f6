use proc_macro::TokenStream;
use quote::{quote, quote_spanned};
use syn::{Ident, ItemFn, parse_macro_input, spanned::Spanned};

/// Runs the test body as the first thread of a fresh scheduler and asserts
/// how the scheduler terminates: `AllFinished` or `Deadlock`.
#[proc_macro_attribute]
pub fn assert_termination(attr: TokenStream, item: TokenStream) -> TokenStream {
    let expected = parse_macro_input!(attr as Ident);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let pattern = match expected.to_string().as_str() {
        "AllFinished" => quote!(sthread::Termination::AllFinished),
        "Deadlock" => quote!(sthread::Termination::Deadlock { .. }),
        _ => {
            return syn::Error::new(expected.span(), "expected `AllFinished` or `Deadlock`")
                .to_compile_error()
                .into();
        }
    };
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            fn _f() {}
            fn _get_name<T>(_: T) -> &'static str {
                let n = core::any::type_name::<T>();
                &n[..n.len() - 4]
            }
            grading::init_logging();
            let scheduler = sthread::Scheduler::new();
            sthread::thread::ThreadBuilder::new(_get_name(_f))
                .spawn_in(&scheduler, move || { #block })
                .unwrap();
            let termination = scheduler.run().unwrap();
            assert!(
                matches!(termination, #pattern),
                "unexpected termination: {:?}",
                termination
            );
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

/// Asserts that every thread stack allocated while the test body runs has
/// been released when it returns.
///
/// Place it below `assert_termination` so that it wraps the whole run.
#[proc_macro_attribute]
pub fn validate_reclaim(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            let _live = grading::live_stacks();
            let _return_val = (move || { #block })();
            assert_eq!(
                grading::live_stacks(),
                _live,
                "Grader: thread stacks were not reclaimed"
            );
            _return_val
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
